//! Error types for the Bluetooth session.

use thiserror::Error;

/// Errors surfaced by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,

    #[error("device {0} is no longer known to the adapter")]
    UnknownDevice(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("disconnect failed: {0}")]
    Disconnect(String),

    #[error("service discovery failed: {0}")]
    Discovery(String),

    #[error("characteristic not found on the connected device")]
    MissingCharacteristic,

    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Errors returned to callers of the session handle.
///
/// Validation failures never reach the adapter; only the `Transport`
/// variant means the radio was involved.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("characteristic does not support {0}")]
    Capability(&'static str),

    #[error("characteristic is not part of the connected device")]
    InvalidTarget,

    #[error("invalid payload: {0}")]
    Encoding(String),

    #[error("no device connected")]
    NotConnected,

    #[error("session task is no longer running")]
    SessionClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
