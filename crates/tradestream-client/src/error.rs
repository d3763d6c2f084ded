/*
[INPUT]:  Error sources (endpoint, transport, parsing, config, worker lifecycle)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the trade stream client
#[derive(Error, Debug)]
pub enum StreamError {
    /// Endpoint could not be turned into a WebSocket URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// WebSocket transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handshake did not complete in time
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectTimeout { duration_ms: u64 },

    /// Inbound frame could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background worker is gone
    #[error("Stream worker stopped")]
    WorkerStopped,
}

impl StreamError {
    /// Check if the reconnect policy should handle this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::ConnectTimeout { .. }
        )
    }

    /// Check if the error was caused by a single bad frame
    pub fn is_frame_error(&self) -> bool {
        matches!(self, StreamError::Parse(_) | StreamError::Serialization(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
