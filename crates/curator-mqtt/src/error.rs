//! Transport error types

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the messaging client
///
/// All of these are non-fatal to the caller: a dropped publish is logged and
/// execution continues, per the engine's failure model.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publish attempted while the broker connection is down; the message
    /// was dropped, not queued.
    #[error("not connected to broker, dropped publish to '{topic}'")]
    NotConnected { topic: String },

    /// The outbound request queue is full; the message was dropped to keep
    /// memory bounded.
    #[error("outbound queue full, dropped publish to '{topic}'")]
    QueueFull { topic: String },

    /// The client has shut down.
    #[error("messaging client is shut down")]
    Shutdown,
}
