//! # NMEA 0183 Constants and Types
//!
//! Sentence framing constants and the [`Fix`] value produced by the decoder.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::time::Instant;

/// Every sentence starts with this byte
pub const NMEA_START_BYTE: u8 = b'$';

/// Separates the sentence body from the two hex checksum digits
pub const NMEA_CHECKSUM_DELIMITER: u8 = b'*';

/// Maximum sentence length accepted by the line splitter.
///
/// The standard caps sentences at 82 characters; vendor extensions run
/// longer, so leave generous headroom before treating a line as garbage.
pub const NMEA_MAX_SENTENCE_LEN: usize = 512;

/// Global positioning system fix data
pub const SENTENCE_GGA: &str = "GGA";

/// Recommended minimum specific GNSS data
pub const SENTENCE_RMC: &str = "RMC";

/// Minimum GGA field count (type + 14 data fields)
pub const GGA_MIN_FIELDS: usize = 15;

/// Minimum RMC field count (type + 11 data fields)
pub const RMC_MIN_FIELDS: usize = 12;

/// GGA fix quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NoFix,
    Gps,
    Dgps,
    Pps,
    Rtk,
    FloatRtk,
    Estimated,
    Manual,
    Simulation,
    Other(u8),
}

impl FixQuality {
    /// Map the numeric GGA quality field
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => FixQuality::NoFix,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::Rtk,
            5 => FixQuality::FloatRtk,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            other => FixQuality::Other(other),
        }
    }

    /// Numeric code as it appeared on the wire
    pub fn code(self) -> u8 {
        match self {
            FixQuality::NoFix => 0,
            FixQuality::Gps => 1,
            FixQuality::Dgps => 2,
            FixQuality::Pps => 3,
            FixQuality::Rtk => 4,
            FixQuality::FloatRtk => 5,
            FixQuality::Estimated => 6,
            FixQuality::Manual => 7,
            FixQuality::Simulation => 8,
            FixQuality::Other(code) => code,
        }
    }
}

/// One accepted GPS position reading
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    /// Latitude in decimal degrees, negative south of the equator
    pub latitude: f64,

    /// Longitude in decimal degrees, negative west of Greenwich
    pub longitude: f64,

    /// Satellites used in the solution (GGA only)
    pub satellites: Option<u8>,

    /// Horizontal dilution of precision (GGA only)
    pub hdop: Option<f32>,

    /// Fix quality indicator (GGA only)
    pub fix_quality: Option<FixQuality>,

    /// UTC time of the position report
    pub time: Option<NaiveTime>,

    /// UTC date of the position report (RMC only)
    pub date: Option<NaiveDate>,

    /// Best-effort absolute UTC time of the report
    pub timestamp: DateTime<Utc>,

    /// Local monotonic time the fix was accepted, used for staleness
    pub acquired_at: Instant,
}
