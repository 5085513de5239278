//! # NMEA 0183 Module
//!
//! Parsing of the position reports a serial GPS receiver emits.
//!
//! This module handles:
//! - XOR checksum validation of each sentence
//! - GGA and RMC decoding into [`Fix`] values
//! - Line framing of a raw byte stream, dropping truncated records
//! - Degrees + decimal minutes to signed decimal degrees conversion

pub mod protocol;
pub mod checksum;
pub mod decoder;
pub mod stream;

pub use protocol::{Fix, FixQuality};
pub use stream::FixStream;
