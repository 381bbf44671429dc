//! Common types and enums used throughout the smq library

use strum_macros::{Display, EnumString};

/// SIP URI schemes as defined in RFC 3261.  Unknown schemes are kept
/// verbatim so the validator can answer 416 instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString, Default)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scheme {
    #[default]
    Sip,
    Sips,
    Tel,
    #[strum(default)]
    Other(String),
}

/// SIP methods we route.  Everything else is rejected with 405 by the
/// validator, so the catch-all keeps the original method name for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Method {
    MESSAGE,
    REGISTER,
    #[strum(default)]
    UNKNOWN(String),
}

/// Body content types accepted for SMS delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default)]
pub enum ContentType {
    #[default]
    #[strum(serialize = "text/plain")]
    TextPlain,
    #[strum(serialize = "application/vnd.3gpp.sms")]
    Vnd3gppSms,
}

/// Processing state of a queued message.
///
/// The discriminants are stable: they index the transition-timeout matrix
/// and are written verbatim into the queue save file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum QueueState {
    #[strum(serialize = "No State")]
    NoState = 0,
    #[strum(serialize = "Initial State")]
    Initial = 1,
    #[strum(serialize = "Request From-Address Lookup")]
    RequestFromLookup = 2,
    #[strum(serialize = "Asked for From-Address")]
    AskedForFromLookup = 3,
    #[strum(serialize = "Awaiting Try Destination IMSI")]
    AwaitingTryDestImsi = 4,
    #[strum(serialize = "Request Destination IMSI")]
    RequestDestImsi = 5,
    #[strum(serialize = "Asked for Destination IMSI")]
    AskedForDestImsi = 6,
    #[strum(serialize = "Awaiting Try Destination SIP URL")]
    AwaitingTryDestSipUrl = 7,
    #[strum(serialize = "Request Destination SIP URL")]
    RequestDestSipUrl = 8,
    #[strum(serialize = "Asked for Destination SIP URL")]
    AskedForDestSipUrl = 9,
    #[strum(serialize = "Awaiting Try Message Delivery")]
    AwaitingTryDelivery = 10,
    #[strum(serialize = "Request Message Delivery")]
    RequestDelivery = 11,
    #[strum(serialize = "Asked for Message Delivery")]
    AskedForDelivery = 12,
    #[strum(serialize = "Delete Me")]
    DeleteMe = 13,
    #[strum(serialize = "Awaiting Register Handset")]
    AwaitingRegisterHandset = 14,
    #[strum(serialize = "Register Handset")]
    RegisterHandset = 15,
    #[strum(serialize = "Asked to Register Handset")]
    AskedToRegisterHandset = 16,
}

/// Number of queue states, sizing the timeout matrix.
pub const STATE_COUNT: usize = 17;

impl QueueState {
    /// Matrix/save-file index of this state.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Recover a state from its save-file integer.  Unknown values are a
    /// load error, not a panic.
    pub fn from_index(index: usize) -> Option<QueueState> {
        use QueueState::*;
        const ALL: [QueueState; STATE_COUNT] = [
            NoState,
            Initial,
            RequestFromLookup,
            AskedForFromLookup,
            AwaitingTryDestImsi,
            RequestDestImsi,
            AskedForDestImsi,
            AwaitingTryDestSipUrl,
            RequestDestSipUrl,
            AskedForDestSipUrl,
            AwaitingTryDelivery,
            RequestDelivery,
            AskedForDelivery,
            DeleteMe,
            AwaitingRegisterHandset,
            RegisterHandset,
            AskedToRegisterHandset,
        ];
        ALL.get(index).copied()
    }

    /// True for the three states a shortcode entry occupies while its
    /// synthesized REGISTER is in flight.
    pub fn is_register_state(self) -> bool {
        matches!(
            self,
            QueueState::AwaitingRegisterHandset
                | QueueState::RegisterHandset
                | QueueState::AskedToRegisterHandset
        )
    }
}
