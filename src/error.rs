//! Error types for the live audio bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can end (or prevent) a live session
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Microphone could not be opened for capture
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Live session connect/send/close failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed audio segment
    #[error("decode error: {0}")]
    Decode(String),

    /// Playback device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// Short machine-readable kind, used in UI error notices
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Permission(_) => "permission",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Audio(_) => "audio",
            Self::Config(_) => "config",
            Self::Http(_) => "http",
        }
    }
}
