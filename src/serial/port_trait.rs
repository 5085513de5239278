//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Byte stream handed out by [`SerialTransport::open`]
pub type SerialReader = Box<dyn AsyncRead + Send + Unpin>;

/// An attached serial device as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Port identifier (e.g., /dev/ttyUSB0 or COM3)
    pub port: String,
    /// Human readable description, only used for auto-detection
    pub description: String,
}

impl DeviceEndpoint {
    pub fn new(port: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            description: description.into(),
        }
    }
}

/// Trait for the serial operations the pinger depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// Enumerate currently attached serial devices
    fn list_devices(&self) -> Result<Vec<DeviceEndpoint>>;

    /// Open a port for reading at the given baud rate
    async fn open(&self, port: &str, baud_rate: u32) -> Result<SerialReader>;
}
