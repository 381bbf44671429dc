//! Wire adapter: datagram receive/send behind a narrow trait
//!
//! The queue core never touches sockets directly.  `UdpTransport` is the
//! real adapter; `MemoryTransport` is a loopback used by the test bench and
//! the benchmarks.  No retransmission lives here, the state machine owns
//! retries.

use crate::error::{SmqError, SmqResult};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Datagram transport as seen by the queue
pub trait Transport: Send + Sync {
    /// Block up to `timeout` for a datagram.  `Ok(None)` means timeout.
    fn recv_datagram(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> SmqResult<Option<(usize, SocketAddr)>>;

    /// Send one datagram
    fn send_datagram(&self, bytes: &[u8], dest: SocketAddr) -> SmqResult<()>;
}

/// Printable `host:port` form used for response routing and persistence
pub fn format_addr(addr: &SocketAddr) -> String {
    addr.to_string()
}

/// Parse a `host:port` string, resolving names like `localhost`
pub fn parse_addr(text: &str) -> Option<SocketAddr> {
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Some(addr);
    }
    text.to_socket_addrs().ok()?.next()
}

static CALL_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Fresh Call-ID number: unique within this process lifetime
pub fn new_call_number() -> String {
    let seq = CALL_NUMBER.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", seq, std::process::id())
}

/// Small pseudo-random number for CSeq seeding, hashed off the clock
pub fn new_random_number() -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    CALL_NUMBER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    hasher.finish() as u32
}

/// UDP datagram adapter
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind the listen port on all interfaces
    pub fn bind(port: u16) -> SmqResult<UdpTransport> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|e| {
            SmqError::transport_error(format!("0.0.0.0:{}", port), e.to_string(), false)
        })?;
        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn recv_datagram(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> SmqResult<Option<(usize, SocketAddr)>> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| SmqError::transport_error("local", e.to_string(), true))?;
        match self.socket.recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(SmqError::transport_error("local", e.to_string(), true)),
        }
    }

    fn send_datagram(&self, bytes: &[u8], dest: SocketAddr) -> SmqResult<()> {
        self.socket
            .send_to(bytes, dest)
            .map(|_| ())
            .map_err(|e| SmqError::transport_error(dest.to_string(), e.to_string(), true))
    }
}

/// In-memory loopback transport for tests and benchmarks
#[derive(Default)]
pub struct MemoryTransport {
    inbox: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    /// Queue a datagram as if it had arrived from `src`
    pub fn push_incoming(&self, bytes: &[u8], src: SocketAddr) {
        self.inbox
            .lock()
            .unwrap()
            .push_back((bytes.to_vec(), src));
    }

    /// Drain everything sent so far
    pub fn take_sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for MemoryTransport {
    fn recv_datagram(
        &self,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> SmqResult<Option<(usize, SocketAddr)>> {
        match self.inbox.lock().unwrap().pop_front() {
            Some((bytes, src)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(Some((len, src)))
            }
            None => Ok(None),
        }
    }

    fn send_datagram(&self, bytes: &[u8], dest: SocketAddr) -> SmqResult<()> {
        self.sent.lock().unwrap().push((bytes.to_vec(), dest));
        Ok(())
    }
}
