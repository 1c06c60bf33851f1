use thiserror::Error as ThisError;

/// Errors that can occur in the shared logger
#[derive(ThisError, Debug)]
pub enum Error {
    /// I/O operation failed (directories, reads, writes, compression).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The ownership channel could not be opened or a frame was malformed.
    #[error("Transport error: {0}")]
    Transport(String),
    /// A rotated file could not be exported through the notification sink.
    #[error("Notification error: {0}")]
    Notification(String),
    /// The global `tracing` subscriber could not be installed.
    #[error("Initialization error: {0}")]
    Init(String),
    /// The date format description could not be parsed.
    #[error("Time format error: {0}")]
    Time(#[from] time::error::InvalidFormatDescription),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
