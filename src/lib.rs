//! smq - store-and-forward queue for SMS carried over SIP
//!
//! Sits between cellular base stations and the subscriber registry,
//! receiving SIP MESSAGE datagrams, resolving sender and recipient,
//! delivering to the destination cell with bounded retries, and persisting
//! the in-flight queue across restarts.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod limits;
pub mod message;
pub mod network;
pub mod persist;
pub mod queue;
pub mod responder;
pub mod shortcode;
pub mod sip;
pub mod types;
pub mod validation;

pub use config::Config;
pub use directory::{Directory, TableDirectory};
pub use engine::{Smq, SmqCommand};
pub use error::{SmqError, SmqResult};
pub use message::{MsgText, QueuedMessage};
pub use network::{MemoryTransport, Transport, UdpTransport};
pub use queue::{now_ms, MessageQueue};
pub use types::{ContentType, Method, QueueState, Scheme};
