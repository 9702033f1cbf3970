use thiserror::Error;

/// Failures surfaced by the session API.
///
/// Transport-level connection drops are never returned from here; they are
/// reported through [`crate::SessionEvent::GattDisconnected`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("bluetooth stack unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("bluetooth adapter not initialized")]
    NotInitialized,

    #[error("unspecified device address")]
    InvalidAddress,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("transport rejected reconnect to {0}")]
    ConnectRejected(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage root {0} is not mounted")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
