// ABOUTME: Error types for the event endpoint transport
// Cloneable so a single link failure can be fanned out to every subscriber

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error on channel {channel}: {message}")]
    Remote { channel: String, message: String },

    #[error("Connection request superseded by a newer request")]
    Superseded,

    #[error("Connection stopped after {0} failed reconnect attempts")]
    Exhausted(u32),
}
