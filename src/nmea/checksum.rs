//! # NMEA Checksum
//!
//! XOR checksum over every byte between the leading `$` and the `*`
//! delimiter, transmitted as two uppercase hex digits.

use super::protocol::{NMEA_CHECKSUM_DELIMITER, NMEA_START_BYTE};
use crate::error::{PingerError, Result};

/// Calculate the NMEA checksum of a sentence body
///
/// # Arguments
///
/// * `body` - Bytes between `$` and `*` (exclusive)
///
/// # Examples
///
/// ```
/// use meshtastic_pinger::nmea::checksum::nmea_checksum;
///
/// assert_eq!(nmea_checksum(b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"), 0x47);
/// ```
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Split a raw sentence into its body and verify the trailing checksum
///
/// # Arguments
///
/// * `sentence` - One complete sentence, line terminator already stripped
///
/// # Returns
///
/// * `Result<&str>` - The verified body (without `$` and `*HH`)
///
/// # Errors
///
/// Returns [`PingerError::MalformedSentence`] if the framing is wrong and
/// [`PingerError::Checksum`] if the checksum does not match.
pub fn verify_sentence(sentence: &str) -> Result<&str> {
    let bytes = sentence.as_bytes();
    if bytes.first() != Some(&NMEA_START_BYTE) {
        return Err(PingerError::MalformedSentence(
            "missing '$' start byte".to_string()
        ));
    }

    let star = bytes
        .iter()
        .rposition(|&b| b == NMEA_CHECKSUM_DELIMITER)
        .ok_or_else(|| PingerError::MalformedSentence("missing checksum".to_string()))?;

    let digits = &sentence[star + 1..];
    if digits.len() != 2 {
        return Err(PingerError::MalformedSentence(
            format!("checksum must be two hex digits, got {:?}", digits)
        ));
    }
    let actual = u8::from_str_radix(digits, 16)
        .map_err(|_| PingerError::MalformedSentence(format!("invalid checksum digits {:?}", digits)))?;

    let body = &sentence[1..star];
    let expected = nmea_checksum(body.as_bytes());
    if expected != actual {
        return Err(PingerError::Checksum { expected, actual });
    }

    Ok(body)
}
