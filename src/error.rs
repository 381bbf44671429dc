//! Unified error handling for smq
//!
//! A single error enum covers the parse, transport, state-machine and
//! persistence failure classes, keeping error plumbing simple across the
//! queue and the SIP layer.

use std::error::Error as StdError;
use std::fmt;

/// Unified error type for smq operations
#[derive(Debug, Clone, PartialEq)]
pub enum SmqError {
    /// SIP message or URI parsing errors
    ParseError {
        message: String,
        context: Option<String>,
    },

    /// Datagram send/receive errors
    TransportError {
        endpoint: String,
        reason: String,
        recoverable: bool,
    },

    /// Queue and state-machine errors
    StateError {
        operation: String,
        reason: String,
    },

    /// Save-file read/write errors
    PersistError {
        path: String,
        reason: String,
    },
}

impl fmt::Display for SmqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmqError::ParseError { message, context } => {
                write!(f, "Parse error: {}", message)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            SmqError::TransportError {
                endpoint,
                reason,
                recoverable,
            } => {
                write!(
                    f,
                    "Transport error to {}: {} (recoverable: {})",
                    endpoint, reason, recoverable
                )
            }
            SmqError::StateError { operation, reason } => {
                write!(f, "State error: {} failed - {}", operation, reason)
            }
            SmqError::PersistError { path, reason } => {
                write!(f, "Persistence error on {}: {}", path, reason)
            }
        }
    }
}

impl StdError for SmqError {}

impl SmqError {
    /// Create a parse error with optional context
    pub fn parse_error(message: impl Into<String>, context: Option<String>) -> Self {
        SmqError::ParseError {
            message: message.into(),
            context,
        }
    }

    /// Create a transport error
    pub fn transport_error(
        endpoint: impl Into<String>,
        reason: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        SmqError::TransportError {
            endpoint: endpoint.into(),
            reason: reason.into(),
            recoverable,
        }
    }

    /// Create a state error
    pub fn state_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SmqError::StateError {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persist_error(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SmqError::PersistError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            SmqError::ParseError { .. } => true,
            SmqError::TransportError { recoverable, .. } => *recoverable,
            SmqError::StateError { .. } => false,
            SmqError::PersistError { .. } => true,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            SmqError::ParseError { .. } => "parsing",
            SmqError::TransportError { .. } => "transport",
            SmqError::StateError { .. } => "state",
            SmqError::PersistError { .. } => "persistence",
        }
    }
}

/// Result type for smq operations
pub type SmqResult<T> = Result<T, SmqError>;
