//! Error types for echolog.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchologError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio source errors
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Failed to open audio source: {message}")]
    SourceOpen { message: String },

    #[error("Failed to read from audio source: {message}")]
    SourceRead { message: String },

    /// A bounded hardware read elapsed without data. Callers treat this as
    /// a chance to re-check the stop flag, not as a failure.
    #[error("Audio source read timed out")]
    SourceReadTimeout,

    // USB transport errors (Pettersson M500)
    #[error("USB transfer failed: {message}")]
    Usb { message: String },

    // Scheduler errors
    #[error("Solar time computation failed: {message}")]
    SolarCompute { message: String },

    #[error("Invalid scheduler event \"{entry}\": {message}")]
    SchedulerEvent { entry: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EchologError>;
