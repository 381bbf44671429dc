//! Directory (HLR) client interface
//!
//! The subscriber registry itself is an external collaborator; the queue
//! only needs the three lookups plus the phone assignment used by the
//! register short code.  Lookups are assumed to return promptly.

use std::collections::HashMap;
use std::sync::Mutex;

/// Narrow view of the subscriber registry
pub trait Directory: Send + Sync {
    /// IMSI → phone number, `None` when unknown
    fn imsi_to_phone(&self, imsi: &str) -> Option<String>;

    /// Phone number → IMSI, `None` when unknown
    fn phone_to_imsi(&self, phone: &str) -> Option<String>;

    /// IMSI → current cell address as `host:port`, `None` when unknown
    fn imsi_to_location(&self, imsi: &str) -> Option<String>;

    /// Bind a phone number to an IMSI (register short code).  Returns false
    /// when the backend refuses or does not support writes.
    fn assign_phone(&self, imsi: &str, phone: &str) -> bool {
        let _ = (imsi, phone);
        false
    }

    /// Map a local phone number to its globally routable form, for traffic
    /// leaving through the relay.  `None` means no mapping is known and the
    /// number is used as-is.
    fn map_clid_global(&self, phone: &str) -> Option<String> {
        let _ = phone;
        None
    }
}

/// Fixed IMSI/phone pairs consulted only after a directory miss.
/// Test-bench scaffolding; real deployments resolve through the registry.
pub const FALLBACK_PAIRS: &[(&str, &str)] = &[
    ("IMSI666410186585295", "+17074700741"),
    ("IMSI777100223456161", "+17074700746"),
];

pub fn fallback_imsi_to_phone(imsi: &str) -> Option<String> {
    FALLBACK_PAIRS
        .iter()
        .find(|(i, _)| *i == imsi)
        .map(|(_, p)| p.to_string())
}

pub fn fallback_phone_to_imsi(phone: &str) -> Option<String> {
    FALLBACK_PAIRS
        .iter()
        .find(|(_, p)| *p == phone)
        .map(|(i, _)| i.to_string())
}

#[derive(Default)]
struct TableState {
    phone_by_imsi: HashMap<String, String>,
    location_by_imsi: HashMap<String, String>,
}

/// Map-backed directory.  The in-process default for the binary until a
/// registry backend is wired up, and the scaffolding for tests.
#[derive(Default)]
pub struct TableDirectory {
    state: Mutex<TableState>,
}

impl TableDirectory {
    pub fn new() -> Self {
        TableDirectory::default()
    }

    /// Seed a subscriber with a phone number and an optional cell address
    pub fn add_subscriber(&self, imsi: &str, phone: &str, location: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state
            .phone_by_imsi
            .insert(imsi.to_string(), phone.to_string());
        if let Some(location) = location {
            state
                .location_by_imsi
                .insert(imsi.to_string(), location.to_string());
        }
    }

    pub fn set_location(&self, imsi: &str, location: &str) {
        self.state
            .lock()
            .unwrap()
            .location_by_imsi
            .insert(imsi.to_string(), location.to_string());
    }
}

impl Directory for TableDirectory {
    fn imsi_to_phone(&self, imsi: &str) -> Option<String> {
        self.state.lock().unwrap().phone_by_imsi.get(imsi).cloned()
    }

    fn phone_to_imsi(&self, phone: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .phone_by_imsi
            .iter()
            .find(|(_, p)| p.as_str() == phone)
            .map(|(imsi, _)| imsi.clone())
    }

    fn imsi_to_location(&self, imsi: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .location_by_imsi
            .get(imsi)
            .cloned()
    }

    fn assign_phone(&self, imsi: &str, phone: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if state
            .phone_by_imsi
            .iter()
            .any(|(other, p)| p == phone && other != imsi)
        {
            return false;
        }
        state
            .phone_by_imsi
            .insert(imsi.to_string(), phone.to_string());
        true
    }
}
