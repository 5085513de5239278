//! # NMEA Sentence Decoder
//!
//! Decodes position-bearing NMEA sentences (GGA, RMC) into [`Fix`] values.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use tokio::time::Instant;

use super::checksum::verify_sentence;
use super::protocol::*;
use crate::error::{PingerError, Result};

/// Decode one sentence using the current wall clock
///
/// # Arguments
///
/// * `sentence` - One complete sentence, line terminator stripped
///
/// # Returns
///
/// * `Ok(Some(fix))` - a checksum-valid GGA/RMC sentence carrying a position
/// * `Ok(None)` - a valid sentence of another type, or one reporting no fix
///
/// # Errors
///
/// Returns error if:
/// - Framing or checksum is invalid
/// - A GGA/RMC sentence has too few fields or unparseable numbers
pub fn decode_sentence(sentence: &str) -> Result<Option<Fix>> {
    decode_sentence_at(sentence, Utc::now())
}

/// Decode one sentence, resolving dateless times against `now`
pub fn decode_sentence_at(sentence: &str, now: DateTime<Utc>) -> Result<Option<Fix>> {
    let body = verify_sentence(sentence)?;
    let fields: Vec<&str> = body.split(',').collect();

    let sentence_id = fields[0];
    let sentence_type = sentence_id
        .len()
        .checked_sub(3)
        .and_then(|start| sentence_id.get(start..))
        .unwrap_or_default();

    match sentence_type {
        SENTENCE_GGA => decode_gga(&fields, now),
        SENTENCE_RMC => decode_rmc(&fields, now),
        _ => Ok(None),
    }
}

/// Decode a GGA (fix data) sentence
///
/// `$--GGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,alt,M,geo,M,age,id`
fn decode_gga(fields: &[&str], now: DateTime<Utc>) -> Result<Option<Fix>> {
    if fields.len() < GGA_MIN_FIELDS {
        return Err(PingerError::MalformedSentence(
            format!("GGA has {} fields, expected {}", fields.len(), GGA_MIN_FIELDS)
        ));
    }

    let fix_quality = parse_optional::<u8>(fields[6], "fix quality")?.map(FixQuality::from_code);
    if fix_quality == Some(FixQuality::NoFix) {
        return Ok(None);
    }

    let (latitude, longitude) = match parse_position(fields[2], fields[3], fields[4], fields[5])? {
        Some(position) => position,
        None => return Ok(None),
    };

    let time = parse_time(fields[1])?;

    Ok(Some(Fix {
        latitude,
        longitude,
        satellites: parse_optional::<u8>(fields[7], "satellites")?,
        hdop: parse_hdop(fields[8])?,
        fix_quality,
        time,
        date: None,
        timestamp: build_timestamp(time, None, now),
        acquired_at: Instant::now(),
    }))
}

/// Decode an RMC (recommended minimum) sentence
///
/// `$--RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,spd,cog,ddmmyy,mv,a[,mode]`
fn decode_rmc(fields: &[&str], now: DateTime<Utc>) -> Result<Option<Fix>> {
    if fields.len() < RMC_MIN_FIELDS {
        return Err(PingerError::MalformedSentence(
            format!("RMC has {} fields, expected {}", fields.len(), RMC_MIN_FIELDS)
        ));
    }

    // 'V' means the receiver has no valid navigation solution
    if fields[2].eq_ignore_ascii_case("V") {
        return Ok(None);
    }

    let (latitude, longitude) = match parse_position(fields[3], fields[4], fields[5], fields[6])? {
        Some(position) => position,
        None => return Ok(None),
    };

    let time = parse_time(fields[1])?;
    let date = parse_date(fields[9])?;

    Ok(Some(Fix {
        latitude,
        longitude,
        satellites: None,
        hdop: None,
        fix_quality: None,
        time,
        date,
        timestamp: build_timestamp(time, date, now),
        acquired_at: Instant::now(),
    }))
}

/// Parse a latitude/longitude pair; `None` when the receiver left them empty
fn parse_position(lat: &str, lat_hemi: &str, lon: &str, lon_hemi: &str) -> Result<Option<(f64, f64)>> {
    if lat.is_empty() || lon.is_empty() {
        return Ok(None);
    }

    let latitude = parse_coordinate(lat, lat_hemi, 90.0, ('N', 'S'))?;
    let longitude = parse_coordinate(lon, lon_hemi, 180.0, ('E', 'W'))?;
    Ok(Some((latitude, longitude)))
}

/// Convert `DDMM.mmmm` / `DDDMM.mmmm` plus hemisphere to signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, max_degrees: f64, (positive, negative): (char, char)) -> Result<f64> {
    let raw: f64 = value
        .parse()
        .map_err(|_| PingerError::MalformedSentence(format!("invalid coordinate {:?}", value)))?;
    if !raw.is_finite() {
        return Err(PingerError::MalformedSentence(format!("invalid coordinate {:?}", value)));
    }

    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if raw < 0.0 || minutes >= 60.0 {
        return Err(PingerError::MalformedSentence(
            format!("coordinate out of range: {}", value)
        ));
    }

    let decimal = degrees + minutes / 60.0;
    if decimal > max_degrees {
        return Err(PingerError::MalformedSentence(
            format!("coordinate out of range: {}", value)
        ));
    }

    let mut chars = hemisphere.chars();
    match (chars.next().map(|c| c.to_ascii_uppercase()), chars.next()) {
        (Some(c), None) if c == positive => Ok(decimal),
        (Some(c), None) if c == negative => Ok(-decimal),
        _ => Err(PingerError::MalformedSentence(
            format!("invalid hemisphere {:?}", hemisphere)
        )),
    }
}

/// Parse `hhmmss` or `hhmmss.sss`; empty means "not reported"
fn parse_time(value: &str) -> Result<Option<NaiveTime>> {
    if value.is_empty() {
        return Ok(None);
    }

    let malformed = || PingerError::MalformedSentence(format!("invalid time {:?}", value));

    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let hour: u32 = whole[0..2].parse().map_err(|_| malformed())?;
    let minute: u32 = whole[2..4].parse().map_err(|_| malformed())?;
    let second: u32 = whole[4..6].parse().map_err(|_| malformed())?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let frac: f64 = format!("0.{}", fraction).parse().map_err(|_| malformed())?;
        (frac * 1_000_000_000.0).round().min(999_999_999.0) as u32
    };

    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .map(Some)
        .ok_or_else(malformed)
}

/// Parse `ddmmyy`; empty means "not reported"
fn parse_date(value: &str) -> Result<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }

    let malformed = || PingerError::MalformedSentence(format!("invalid date {:?}", value));

    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let day: u32 = value[0..2].parse().map_err(|_| malformed())?;
    let month: u32 = value[2..4].parse().map_err(|_| malformed())?;
    let year: i32 = value[4..6].parse().map_err(|_| malformed())?;

    NaiveDate::from_ymd_opt(2000 + year, month, day)
        .map(Some)
        .ok_or_else(malformed)
}

fn parse_optional<T: std::str::FromStr>(value: &str, name: &str) -> Result<Option<T>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| PingerError::MalformedSentence(format!("invalid {} {:?}", name, value)))
}

fn parse_hdop(value: &str) -> Result<Option<f32>> {
    match parse_optional::<f32>(value, "hdop")? {
        Some(hdop) if !hdop.is_finite() => {
            Err(PingerError::MalformedSentence(format!("invalid hdop {:?}", value)))
        }
        hdop => Ok(hdop),
    }
}

/// Combine sentence time and date into an absolute UTC timestamp.
///
/// A sentence without a date is assumed to be from today; if that lands more
/// than a minute in the future the report was from just before midnight.
fn build_timestamp(time: Option<NaiveTime>, date: Option<NaiveDate>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(time) = time else {
        return now;
    };

    match date {
        Some(date) => date.and_time(time).and_utc(),
        None => {
            let sent = now.date_naive().and_time(time).and_utc();
            if sent > now + ChronoDuration::minutes(1) {
                sent - ChronoDuration::days(1)
            } else {
                sent
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nmea::checksum::nmea_checksum;
    use chrono::{Datelike, TimeZone, Timelike};

    /// Frame a sentence body with `$`, checksum and CRLF
    pub(crate) fn sentence(body: &str) -> String {
        format!("${}*{:02X}\r\n", body, nmea_checksum(body.as_bytes()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_gga() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let fix = decode_sentence_at(line, now()).unwrap().unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert!((fix.longitude - 11.516_666_7).abs() < 1e-6);
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.hdop, Some(0.9));
        assert_eq!(fix.fix_quality, Some(FixQuality::Gps));
        assert_eq!(fix.time, NaiveTime::from_hms_opt(12, 35, 19));
        assert_eq!(fix.date, None);
    }

    #[test]
    fn test_decode_gga_southern_western_hemisphere() {
        let line = sentence("GNGGA,101530.00,3707.4070,S,12232.5926,W,2,08,0.9,10.0,M,0.0,M,,");
        let fix = decode_sentence_at(line.trim_end(), now()).unwrap().unwrap();

        assert!((fix.latitude + 37.12345).abs() < 1e-9);
        assert!((fix.longitude + 122.54321).abs() < 1e-9);
        assert_eq!(fix.fix_quality, Some(FixQuality::Dgps));
    }

    #[test]
    fn test_decode_gga_no_fix_quality_is_dropped() {
        let line = sentence("GPGGA,123519,4807.038,N,01131.000,E,0,00,99.9,,M,,M,,");
        assert!(decode_sentence_at(line.trim_end(), now()).unwrap().is_none());
    }

    #[test]
    fn test_decode_gga_empty_position_is_dropped() {
        let line = sentence("GPGGA,123519,,,,,1,00,,,M,,M,,");
        assert!(decode_sentence_at(line.trim_end(), now()).unwrap().is_none());
    }

    #[test]
    fn test_decode_gga_missing_hdop() {
        let line = sentence("GPGGA,123519,4807.038,N,01131.000,E,1,05,,545.4,M,46.9,M,,");
        let fix = decode_sentence_at(line.trim_end(), now()).unwrap().unwrap();
        assert_eq!(fix.hdop, None);
        assert_eq!(fix.satellites, Some(5));
    }

    #[test]
    fn test_decode_gga_too_few_fields() {
        let line = sentence("GPGGA,123519,4807.038,N,01131.000,E,1");
        let result = decode_sentence_at(line.trim_end(), now());
        assert!(matches!(result, Err(PingerError::MalformedSentence(_))));
    }

    #[test]
    fn test_decode_gga_bad_hemisphere() {
        let line = sentence("GPGGA,123519,4807.038,X,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let result = decode_sentence_at(line.trim_end(), now());
        assert!(matches!(result, Err(PingerError::MalformedSentence(_))));
    }

    #[test]
    fn test_decode_gga_non_finite_coordinates() {
        for body in [
            "GPGGA,101530,NaN,N,12232.5926,W,1,08,0.9,10.0,M,0.0,M,,",
            "GPGGA,101530,3707.4070,N,inf,W,1,08,0.9,10.0,M,0.0,M,,",
            "GPRMC,101530,A,NaN,N,inf,W,0.0,0.0,010625,,",
        ] {
            let line = sentence(body);
            let result = decode_sentence_at(line.trim_end(), now());
            assert!(matches!(result, Err(PingerError::MalformedSentence(_))), "{}", body);
        }
    }

    #[test]
    fn test_decode_gga_non_finite_hdop() {
        let line = sentence("GPGGA,101530,3707.4070,N,12232.5926,W,1,08,NaN,10.0,M,0.0,M,,");
        let result = decode_sentence_at(line.trim_end(), now());
        assert!(matches!(result, Err(PingerError::MalformedSentence(_))));
    }

    #[test]
    fn test_decode_gga_minutes_out_of_range() {
        let line = sentence("GPGGA,123519,4875.000,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let result = decode_sentence_at(line.trim_end(), now());
        assert!(matches!(result, Err(PingerError::MalformedSentence(_))));
    }

    #[test]
    fn test_decode_rmc() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let fix = decode_sentence_at(line, now()).unwrap().unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert_eq!(fix.date, NaiveDate::from_ymd_opt(2094, 3, 23));
        assert_eq!(fix.satellites, None);
        assert_eq!(fix.fix_quality, None);
        assert_eq!(fix.timestamp.year(), 2094);
        assert_eq!(fix.timestamp.hour(), 12);
    }

    #[test]
    fn test_decode_rmc_void_status_is_dropped() {
        let line = "$GPRMC,123519,V,4807.038,N,01131.000,E,0.0,0.0,200520,,,N*62";
        assert!(decode_sentence_at(line, now()).unwrap().is_none());
    }

    #[test]
    fn test_unrelated_sentence_is_ignored() {
        let line = sentence("GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00");
        assert!(decode_sentence_at(line.trim_end(), now()).unwrap().is_none());
    }

    #[test]
    fn test_checksum_failure_is_reported() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00";
        let result = decode_sentence_at(line, now());
        assert!(matches!(result, Err(PingerError::Checksum { .. })));
    }

    #[test]
    fn test_time_with_fraction() {
        let time = parse_time("101530.25").unwrap().unwrap();
        assert_eq!(time.hour(), 10);
        assert_eq!(time.minute(), 15);
        assert_eq!(time.second(), 30);
        assert_eq!(time.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_invalid_time() {
        assert!(parse_time("1015").is_err());
        assert!(parse_time("256000").is_err());
        assert!(parse_time("").unwrap().is_none());
    }

    #[test]
    fn test_timestamp_uses_today_without_date() {
        let time = NaiveTime::from_hms_opt(10, 15, 30);
        let ts = build_timestamp(time, None, now());
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 10, 15, 30).unwrap());
    }

    #[test]
    fn test_timestamp_rolls_back_across_midnight() {
        // 23:59:50 reported at 00:00:05 belongs to the previous day
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 5).unwrap();
        let time = NaiveTime::from_hms_opt(23, 59, 50);
        let ts = build_timestamp(time, None, now);
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 50).unwrap());
    }

    #[test]
    fn test_timestamp_without_time_is_now() {
        assert_eq!(build_timestamp(None, None, now()), now());
    }
}
