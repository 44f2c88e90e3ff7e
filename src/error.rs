//! Error types for the voice client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device closed")]
    Closed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Framing errors raised while encoding or decoding packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Declared or requested payload length exceeds the protocol maximum
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Stream ended part-way through a header or payload
    #[error("Stream closed mid-packet: got {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error breaks the framing (as opposed to a plain I/O failure)
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::PayloadTooLarge(_) | Self::Truncated { .. })
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Session already active")]
    AlreadyActive,

    #[error("Connect aborted")]
    Aborted,
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
