//! Session error types shared by the inbound and outbound sides

use std::fmt;

use crate::tls::TlsError;

/// Error type for broker session operations
#[derive(Debug)]
pub enum SessionError {
    /// Connection could not be established or was refused
    Connection(String),
    /// A subscription request failed; later subscriptions were not attempted
    Subscription { topic: String, reason: String },
    /// A single publish failed
    Publish(String),
    /// Releasing the connection failed
    Close(String),
    /// TLS material could not be loaded
    Tls(TlsError),
    /// Invalid configuration
    InvalidConfig(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connection(msg) => write!(f, "Connection error: {}", msg),
            SessionError::Subscription { topic, reason } => {
                write!(f, "Failed to subscribe to topic {}: {}", topic, reason)
            }
            SessionError::Publish(msg) => write!(f, "Publish error: {}", msg),
            SessionError::Close(msg) => write!(f, "Close error: {}", msg),
            SessionError::Tls(e) => write!(f, "TLS config error: {}", e),
            SessionError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TlsError> for SessionError {
    fn from(e: TlsError) -> Self {
        SessionError::Tls(e)
    }
}
