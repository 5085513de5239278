//! # Serial Communication Module
//!
//! Handles the serial side of both peripherals.
//!
//! This module handles:
//! - Enumerating attached USB serial devices with a matchable description
//! - Opening the GPS port (8N1, no flow control) for async reads
//! - Picking the GPS and radio ports by description when not configured

pub mod locator;
pub mod port_trait;

use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::debug;

use crate::error::{PingerError, Result};
pub use port_trait::{DeviceEndpoint, SerialReader, SerialTransport};

/// Default baud rate of consumer GPS receivers
pub const DEFAULT_GPS_BAUD_RATE: u32 = 9600;

/// [`SerialTransport`] backed by `tokio-serial`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialTransport;

impl TokioSerialTransport {
    /// Open a specific serial port with 8N1 settings
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<SerialStream>` - Opened serial port
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| PingerError::Connect(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    fn list_devices(&self) -> Result<Vec<DeviceEndpoint>> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| PingerError::DeviceNotFound(format!("Failed to list serial ports: {}", e)))?;

        let devices = ports
            .into_iter()
            .map(|info| DeviceEndpoint::new(info.port_name, describe(&info.port_type)))
            .collect::<Vec<_>>();

        debug!("Found {} serial devices", devices.len());
        Ok(devices)
    }

    async fn open(&self, port: &str, baud_rate: u32) -> Result<SerialReader> {
        debug!("Opening serial port {} at {} baud", port, baud_rate);
        let stream = Self::open_port(port, baud_rate)?;
        Ok(Box::new(stream))
    }
}

/// Flatten the enumeration metadata into one searchable description
fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => describe_usb(
            [usb.manufacturer.as_deref(), usb.product.as_deref(), usb.serial_number.as_deref()],
            usb.vid,
            usb.pid,
        ),
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => String::new(),
    }
}

fn describe_usb(labels: [Option<&str>; 3], vid: u16, pid: u16) -> String {
    let mut parts: Vec<String> = labels.into_iter().flatten().map(str::to_string).collect();
    parts.push(format!("USB VID:PID={:04X}:{:04X}", vid, pid));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_GPS_BAUD_RATE, 9600);
    }

    #[test]
    fn test_describe_usb_port() {
        let description = describe_usb(
            [Some("u-blox AG"), Some("u-blox 7 - GPS/GNSS Receiver"), None],
            0x1546,
            0x01a7,
        );

        assert!(description.contains("u-blox AG"));
        assert!(description.contains("GPS/GNSS"));
        assert!(description.contains("USB VID:PID=1546:01A7"));
    }

    #[test]
    fn test_describe_unknown_port() {
        assert_eq!(describe(&SerialPortType::Unknown), "");
    }

    #[tokio::test]
    async fn test_open_port_with_invalid_path_returns_error() {
        let result = TokioSerialTransport
            .open("/dev/nonexistent_serial_device_12345", DEFAULT_GPS_BAUD_RATE)
            .await;

        match result {
            Err(PingerError::Connect(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Connect error, got: {:?}", other),
            Ok(_) => panic!("Expected Connect error, got an open port"),
        }
    }

    // Integration test - only runs if serial hardware is connected
    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn test_list_devices_with_real_hardware() {
        let devices = TokioSerialTransport.list_devices().unwrap();
        for device in &devices {
            println!("{}: {}", device.port, device.description);
        }
    }
}
