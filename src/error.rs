//! # Error Types
//!
//! Custom error types for the pinger using `thiserror`.
//!
//! Only [`PingerError::Config`] and [`PingerError::ConfigParse`] are fatal, and
//! only at startup. Everything else is an expected steady-state condition of
//! an unattended field device and is logged and retried by the dispatch loop.

use thiserror::Error;

/// Main error type for the pinger
#[derive(Debug, Error)]
pub enum PingerError {
    /// No attached serial device matched the search hints
    #[error("No matching serial device found: {0}")]
    DeviceNotFound(String),

    /// Opening a serial port or completing the radio handshake failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// I/O failure, end of stream or silence while reading GPS sentences
    #[error("GPS read error: {0}")]
    Read(String),

    /// One NMEA record failed checksum validation
    #[error("NMEA checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// One NMEA record had the wrong shape
    #[error("Malformed NMEA sentence: {0}")]
    MalformedSentence(String),

    /// No fix recent enough to be sent
    #[error("No usable GPS fix within {0:?}")]
    NoUsableFix(std::time::Duration),

    /// Message transmission failed
    #[error("Send error: {0}")]
    Send(String),

    /// Configuration values are missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the pinger
pub type Result<T> = std::result::Result<T, PingerError>;
