//! # Device Locator
//!
//! Best-effort selection of the GPS and radio ports from the list of attached
//! serial devices, by case-insensitive substring match on the description.
//! The `find*` functions are pure; [`locate`] adds the enumeration.

use tracing::debug;

use super::port_trait::{DeviceEndpoint, SerialTransport};
use crate::error::{PingerError, Result};

/// Description fragments that identify a GPS receiver
pub const GPS_HINTS: &[&str] = &["gps", "gnss", "nmea", "ublox", "u-blox", "beidou"];

/// Description fragments that identify a Meshtastic radio or its USB bridge
pub const RADIO_HINTS: &[&str] = &["meshtastic", "ttgo", "t-beam", "esp32", "usb serial", "cp210", "ch340"];

/// Which peripheral a lookup is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gps,
    Radio,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Gps => write!(f, "GPS"),
            DeviceKind::Radio => write!(f, "radio"),
        }
    }
}

/// First device whose description contains any hint
///
/// # Arguments
///
/// * `devices` - Enumerated devices, in enumeration order
/// * `hints` - Substrings to look for, matched case-insensitively
/// * `exclude` - Ports already claimed by the other peripheral
pub fn find(devices: &[DeviceEndpoint], hints: &[&str], exclude: &[String]) -> Option<DeviceEndpoint> {
    devices
        .iter()
        .filter(|device| !is_excluded(device, exclude))
        .find(|device| matches_any(device, hints))
        .cloned()
}

/// Pick the GPS receiver
pub fn find_gps_port(devices: &[DeviceEndpoint], exclude: &[String]) -> Option<DeviceEndpoint> {
    find(devices, GPS_HINTS, exclude)
}

/// Pick the radio, falling back to the first device that is not a GPS
pub fn find_radio_port(devices: &[DeviceEndpoint], exclude: &[String]) -> Option<DeviceEndpoint> {
    find(devices, RADIO_HINTS, exclude).or_else(|| {
        devices
            .iter()
            .filter(|device| !is_excluded(device, exclude))
            .find(|device| !matches_any(device, GPS_HINTS))
            .cloned()
    })
}

/// Enumerate attached devices and pick one for `kind`
///
/// # Errors
///
/// Returns [`PingerError::DeviceNotFound`] if enumeration fails or nothing
/// matches.
pub fn locate<T: SerialTransport + ?Sized>(
    transport: &T,
    kind: DeviceKind,
    exclude: &[String],
) -> Result<DeviceEndpoint> {
    let devices = transport
        .list_devices()
        .map_err(|e| PingerError::DeviceNotFound(format!("{} port: {}", kind, e)))?;

    debug!("Searching {} devices for a {} port", devices.len(), kind);

    let found = match kind {
        DeviceKind::Gps => find_gps_port(&devices, exclude),
        DeviceKind::Radio => find_radio_port(&devices, exclude),
    };

    found.ok_or_else(|| {
        PingerError::DeviceNotFound(format!(
            "no {} port among {} attached devices",
            kind,
            devices.len()
        ))
    })
}

fn is_excluded(device: &DeviceEndpoint, exclude: &[String]) -> bool {
    exclude.iter().any(|port| port.eq_ignore_ascii_case(&device.port))
}

fn matches_any(device: &DeviceEndpoint, hints: &[&str]) -> bool {
    let haystack = device.description.to_lowercase();
    hints.iter().any(|hint| haystack.contains(&hint.to_lowercase()))
}
