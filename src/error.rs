//! Error types for kala-trace

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// kala-trace error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration serialization error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Invalid network address in configuration
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The offending address string
        addr: String,
        /// Why it was rejected
        reason: String,
    },

    /// Log destination could not be created (fatal to the session)
    #[error("Log setup failed: {0}")]
    LogSetup(String),

    /// No log destination was ever assigned for this session
    #[error("No recording produced for this session")]
    NoRecording,

    /// Upload transport failure (connect, send, or close-ack timeout)
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Close acknowledgment not observed within the bounded wait
    #[error("Timed out waiting for upload close acknowledgment")]
    CloseAckTimeout,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
