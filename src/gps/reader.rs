//! # GPS Reader
//!
//! Background task that owns the GPS serial port and feeds the [`FixStore`],
//! plus the supervisor the dispatch loop uses to keep that task alive.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::store::FixStore;
use crate::error::Result;
use crate::nmea::FixStream;
use crate::serial::locator::{locate, DeviceKind};
use crate::serial::SerialTransport;
use crate::state::LinkState;

/// Silence limit on the port, as a multiple of the fix timeout
pub const IDLE_LIMIT_FACTOR: u32 = 2;

/// Parameters for the reader task
#[derive(Debug, Clone)]
pub struct GpsSettings {
    /// Explicit port; auto-detected when `None`
    pub port: Option<String>,
    pub baud_rate: u32,
    /// A port that talks but yields no fix for this long is degraded; one
    /// that stays silent for [`IDLE_LIMIT_FACTOR`] times as long is dropped
    pub fix_timeout: Duration,
    /// Ports auto-detection must not pick (the radio's)
    pub exclude: Vec<String>,
}

/// Link status published by the reader task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsStatus {
    pub state: LinkState,
    pub port: Option<String>,
}

/// Keeps one reader task running, restarting it after it fails
pub struct GpsSupervisor<S: SerialTransport + ?Sized> {
    transport: Arc<S>,
    store: Arc<FixStore>,
    settings: GpsSettings,
    task: Option<JoinHandle<Result<()>>>,
    status_tx: Arc<watch::Sender<GpsStatus>>,
    status_rx: watch::Receiver<GpsStatus>,
    starts: u64,
}

impl<S: SerialTransport + ?Sized> std::fmt::Debug for GpsSupervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsSupervisor")
            .field("settings", &self.settings)
            .field("status", &*self.status_rx.borrow())
            .field("starts", &self.starts)
            .finish_non_exhaustive()
    }
}

impl<S: SerialTransport + ?Sized + 'static> GpsSupervisor<S> {
    pub fn new(transport: Arc<S>, store: Arc<FixStore>, settings: GpsSettings) -> Self {
        let (status_tx, status_rx) = watch::channel(GpsStatus {
            state: LinkState::Disconnected,
            port: settings.port.clone(),
        });

        Self {
            transport,
            store,
            settings,
            task: None,
            status_tx: Arc::new(status_tx),
            status_rx,
            starts: 0,
        }
    }

    /// Start the reader task, or restart it if it has ended
    ///
    /// # Returns
    ///
    /// * `bool` - true if a new task was spawned
    pub async fn ensure_running(&mut self) -> bool {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                self.task = Some(task);
                return false;
            }

            match task.await {
                Ok(Ok(())) => info!("GPS reader stopped"),
                Ok(Err(e)) => warn!("GPS reader stopped: {}", e),
                Err(e) => error!("GPS reader task failed: {}", e),
            }
        }

        self.starts += 1;
        if self.starts > 1 {
            info!("Restarting GPS reader (attempt {})", self.starts);
        }

        let transport = self.transport.clone();
        let store = self.store.clone();
        let settings = self.settings.clone();
        let status = self.status_tx.clone();
        self.task = Some(tokio::spawn(async move {
            read_fixes(transport.as_ref(), &store, &settings, &status).await
        }));
        true
    }

    /// Latest link status
    pub fn status(&self) -> GpsStatus {
        self.status_rx.borrow().clone()
    }

    /// How many times a reader task was started
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Abort the reader task
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.status_tx.send_modify(|status| status.state = LinkState::Disconnected);
    }
}

impl<S: SerialTransport + ?Sized> Drop for GpsSupervisor<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Body of the reader task: resolve, open, then record fixes until failure
async fn read_fixes<S: SerialTransport + ?Sized>(
    transport: &S,
    store: &FixStore,
    settings: &GpsSettings,
    status: &watch::Sender<GpsStatus>,
) -> Result<()> {
    let set_state = |state: LinkState, port: Option<&str>| {
        status.send_modify(|s| {
            s.state = state;
            s.port = port.map(str::to_string);
        });
    };

    set_state(LinkState::Connecting, settings.port.as_deref());

    let port = match &settings.port {
        Some(port) => port.clone(),
        None => match locate(transport, DeviceKind::Gps, &settings.exclude) {
            Ok(endpoint) => {
                info!("Auto-detected GPS port {} ({})", endpoint.port, endpoint.description);
                endpoint.port
            }
            Err(e) => {
                set_state(LinkState::Disconnected, None);
                return Err(e);
            }
        },
    };

    let reader = match transport.open(&port, settings.baud_rate).await {
        Ok(reader) => reader,
        Err(e) => {
            set_state(LinkState::Disconnected, Some(&port));
            return Err(e);
        }
    };

    info!("GPS connected on {} at {} baud", port, settings.baud_rate);
    set_state(LinkState::Connected, Some(&port));

    let mut stream = FixStream::new(reader, settings.fix_timeout * IDLE_LIMIT_FACTOR);
    loop {
        match timeout(settings.fix_timeout, stream.next_fix()).await {
            Ok(Ok(fix)) => {
                debug!(
                    "GPS fix: lat={:.6} lon={:.6} sats={:?} hdop={:?}",
                    fix.latitude, fix.longitude, fix.satellites, fix.hdop
                );
                store.record(fix);
                if status.borrow().state != LinkState::Connected {
                    info!("GPS on {} is delivering fixes again", port);
                    set_state(LinkState::Connected, Some(&port));
                }
            }
            Ok(Err(e)) => {
                warn!("GPS on {} disconnected: {}", port, e);
                set_state(LinkState::Disconnected, Some(&port));
                return Err(e);
            }
            Err(_) => {
                if status.borrow().state != LinkState::Degraded {
                    warn!(
                        "GPS on {} delivered no valid fix for {:?} ({} records rejected)",
                        port, settings.fix_timeout, stream.rejected()
                    );
                    set_state(LinkState::Degraded, Some(&port));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PingerError;
    use crate::nmea::decoder::tests::sentence;
    use crate::serial::port_trait::{MockSerialTransport, SerialReader};
    use crate::serial::DeviceEndpoint;
    use tokio_test::io::Builder;

    fn settings(port: Option<&str>) -> GpsSettings {
        GpsSettings {
            port: port.map(str::to_string),
            baud_rate: 9600,
            fix_timeout: Duration::from_secs(15),
            exclude: Vec::new(),
        }
    }

    fn one_fix_then_silence() -> SerialReader {
        let line = sentence("GPGGA,101530,3707.4070,N,12232.5926,W,1,08,0.9,10.0,M,0.0,M,,");
        Box::new(
            Builder::new()
                .read(line.as_bytes())
                .wait(Duration::from_secs(3600))
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_records_fix() {
        let mut transport = MockSerialTransport::new();
        transport
            .expect_open()
            .withf(|port, baud| port == "/dev/ttyACM0" && *baud == 9600)
            .times(1)
            .returning(|_, _| Ok(one_fix_then_silence()));

        let store = Arc::new(FixStore::new());
        let mut gps = GpsSupervisor::new(Arc::new(transport), store.clone(), settings(Some("/dev/ttyACM0")));

        assert!(gps.ensure_running().await);
        let fix = store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await.unwrap();
        assert!((fix.latitude - 37.12345).abs() < 1e-9);
        assert_eq!(gps.status().state, LinkState::Connected);
        assert_eq!(gps.status().port.as_deref(), Some("/dev/ttyACM0"));

        // Still running, so no restart
        assert!(!gps.ensure_running().await);
        assert_eq!(gps.starts(), 1);
        gps.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_restarts_after_open_failure() {
        let mut transport = MockSerialTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|port, _| Err(PingerError::Connect(format!("Failed to open {}", port))));
        transport
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(one_fix_then_silence()));

        let store = Arc::new(FixStore::new());
        let mut gps = GpsSupervisor::new(Arc::new(transport), store.clone(), settings(Some("/dev/ttyACM0")));

        gps.ensure_running().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gps.status().state, LinkState::Disconnected);
        assert!(store.current(Duration::from_secs(15)).is_none());

        assert!(gps.ensure_running().await);
        assert!(store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await.is_ok());
        assert_eq!(gps.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_auto_detects_port_excluding_radio() {
        let mut transport = MockSerialTransport::new();
        transport.expect_list_devices().returning(|| {
            Ok(vec![
                DeviceEndpoint::new("/dev/ttyUSB0", "GPS via CP2102"),
                DeviceEndpoint::new("/dev/ttyUSB1", "u-blox GNSS receiver"),
            ])
        });
        transport
            .expect_open()
            .withf(|port, _| port == "/dev/ttyUSB1")
            .times(1)
            .returning(|_, _| Ok(one_fix_then_silence()));

        let store = Arc::new(FixStore::new());
        let mut config = settings(None);
        config.exclude = vec!["/dev/ttyUSB0".to_string()];
        let mut gps = GpsSupervisor::new(Arc::new(transport), store.clone(), config);

        gps.ensure_running().await;
        assert!(store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await.is_ok());
        assert_eq!(gps.status().port.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_ends_on_silent_port() {
        let mut transport = MockSerialTransport::new();
        transport
            .expect_open()
            .returning(|_, _| Ok(Box::new(Builder::new().wait(Duration::from_secs(3600)).build())));

        let store = Arc::new(FixStore::new());
        let mut gps = GpsSupervisor::new(Arc::new(transport), store, settings(Some("/dev/ttyACM0")));

        gps.ensure_running().await;
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(gps.status().state, LinkState::Degraded);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(gps.status().state, LinkState::Disconnected);
        assert!(gps.ensure_running().await, "silent reader should be restarted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_degrades_without_valid_fix() {
        let mut transport = MockSerialTransport::new();
        transport.expect_open().returning(|_, _| {
            // Talks every 5s but never reports a position
            let mut builder = Builder::new();
            for _ in 0..10 {
                builder.read(b"$GPGSV,1,1,00*79\r\n").wait(Duration::from_secs(5));
            }
            Ok(Box::new(builder.build()))
        });

        let store = Arc::new(FixStore::new());
        let mut gps = GpsSupervisor::new(Arc::new(transport), store.clone(), settings(Some("/dev/ttyACM0")));

        gps.ensure_running().await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(gps.status().state, LinkState::Degraded);
        assert!(store.current(Duration::from_secs(15)).is_none());
        gps.stop();
    }
}
