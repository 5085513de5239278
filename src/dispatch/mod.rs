//! # Dispatch Module
//!
//! Fixed-cadence loop that turns the latest GPS fix into a direct message.
//!
//! Each cycle:
//! 1. Restarts the GPS reader task if it ended
//! 2. Waits up to `gps_timeout` for a fix no older than `gps_timeout`
//! 3. Makes sure the radio is connected (auto-detecting its port if needed)
//! 4. Renders the template and sends it to the target node
//! 5. Sleeps until `cycle_start + send_interval`
//!
//! A failed step only ends the current cycle; the send interval doubles as
//! the reconnect backoff.

pub mod template;

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::gps::{FixStore, GpsSettings, GpsSupervisor};
use crate::radio::{MeshTransport, ModemPreset, NodeId, RadioSession};
use crate::serial::locator::{locate, DeviceKind};
use crate::serial::SerialTransport;
use template::{MessageTemplate, TemplateValues};

/// Result of one dispatch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sent,
    NoFix,
    ConnectFailed,
    SendFailed,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleOutcome::Sent => "sent",
            CycleOutcome::NoFix => "no fix",
            CycleOutcome::ConnectFailed => "radio connect failed",
            CycleOutcome::SendFailed => "send failed",
        };
        f.write_str(name)
    }
}

/// Running totals of cycle outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub cycles: u64,
    pub sent: u64,
    pub no_fix: u64,
    pub connect_failed: u64,
    pub send_failed: u64,
}

impl DispatchStats {
    pub fn record(&mut self, outcome: CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Sent => self.sent += 1,
            CycleOutcome::NoFix => self.no_fix += 1,
            CycleOutcome::ConnectFailed => self.connect_failed += 1,
            CycleOutcome::SendFailed => self.send_failed += 1,
        }
    }
}

/// Owns both peripherals and drives the send cycle
pub struct Dispatcher<S: SerialTransport + ?Sized + 'static, T: MeshTransport> {
    config: Arc<Config>,
    target: NodeId,
    preset: ModemPreset,
    template: MessageTemplate,
    serial: Arc<S>,
    store: Arc<FixStore>,
    gps: GpsSupervisor<S>,
    radio: RadioSession<T>,
    /// Auto-detected radio port, kept until a connect on it fails
    radio_port: Option<String>,
    stats: DispatchStats,
}

impl<S: SerialTransport + ?Sized + 'static, T: MeshTransport> Dispatcher<S, T> {
    /// Build a dispatcher from validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PingerError::Config`] if the target, radio
    /// mode or template is invalid.
    pub fn new(config: Arc<Config>, serial: Arc<S>, mesh: T) -> Result<Self> {
        let target = config.target_node_id()?;
        let preset = config.modem_preset()?;
        let template = config.template()?;

        let store = Arc::new(FixStore::new());
        let gps = GpsSupervisor::new(
            serial.clone(),
            store.clone(),
            GpsSettings {
                port: config.gps_port.clone(),
                baud_rate: config.gps_baud_rate,
                fix_timeout: config.gps_timeout(),
                exclude: config.meshtastic_port.iter().cloned().collect(),
            },
        );
        let radio = RadioSession::new(mesh, config.radio_connect_timeout());

        Ok(Self {
            config,
            target,
            preset,
            template,
            serial,
            store,
            gps,
            radio,
            radio_port: None,
            stats: DispatchStats::default(),
        })
    }

    /// Run cycles until `shutdown` becomes true, then release both devices
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Sending GPS fixes to {} every {:?} (gps timeout {:?}, mode {})",
            self.target,
            self.config.send_interval(),
            self.config.gps_timeout(),
            self.preset
        );

        while !*shutdown.borrow() {
            let cycle_start = Instant::now();
            let outcome = self.run_cycle().await;
            self.stats.record(outcome);
            debug!("Cycle {} finished: {}", self.stats.cycles, outcome);

            let next_cycle = cycle_start + self.config.send_interval();
            if next_cycle <= Instant::now() {
                warn!("Cycle took longer than the send interval; starting the next one now");
                continue;
            }

            Self::sleep_until_next_cycle(next_cycle, &mut shutdown).await;
        }

        info!(
            "Stopping after {} cycles ({} sent, {} without fix, {} connect failures, {} send failures)",
            self.stats.cycles,
            self.stats.sent,
            self.stats.no_fix,
            self.stats.connect_failed,
            self.stats.send_failed
        );
        self.shutdown().await;
    }

    /// Sleep until `deadline`, returning early only when shutdown is requested
    async fn sleep_until_next_cycle(deadline: Instant, shutdown: &mut watch::Receiver<bool>) {
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = sleep_until(deadline) => return,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // No one left to request a stop; keep the cadence
                        sleep_until(deadline).await;
                        return;
                    }
                }
            }
        }
    }

    /// One acquire/connect/send pass
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.gps.ensure_running().await;

        let gps_timeout = self.config.gps_timeout();
        let fix = match self.store.wait_for_fix(gps_timeout, gps_timeout).await {
            Ok(fix) => fix,
            Err(e) => {
                let status = self.gps.status();
                warn!(
                    "{} (GPS {} on {}); nothing to send this cycle",
                    e,
                    status.state,
                    status.port.as_deref().unwrap_or("no port")
                );
                // Keep the radio link up even without a fix
                if let Err(e) = self.ensure_radio().await {
                    error!("{}; retrying in {:?}", e, self.config.send_interval());
                }
                return CycleOutcome::NoFix;
            }
        };

        info!(
            "GPS fix acquired: lat={:.6} lon={:.6} hdop={} sats={} time={}",
            fix.latitude,
            fix.longitude,
            fix.hdop.map_or_else(|| template::UNAVAILABLE.to_string(), |h| h.to_string()),
            fix.satellites.map_or_else(|| template::UNAVAILABLE.to_string(), |s| s.to_string()),
            fix.timestamp.to_rfc3339()
        );

        if let Err(e) = self.ensure_radio().await {
            error!("{}; retrying in {:?}", e, self.config.send_interval());
            return CycleOutcome::ConnectFailed;
        }

        let mut values = TemplateValues::new(&fix);
        if self.template.uses_signal() {
            values.snr = self.radio.target_snr(self.target).await;
            values.radio_snr = self.radio.radio_snr().await;
        }
        let text = self.template.render(&values);

        match self.radio.send_direct_message(self.target, &text, self.config.want_ack).await {
            Ok(()) => {
                info!("Sent to {}: {}", self.target, text);
                CycleOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send to {}: {}", self.target, e);
                CycleOutcome::SendFailed
            }
        }
    }

    /// Connect the radio unless a live link is already open
    async fn ensure_radio(&mut self) -> Result<()> {
        if self.radio.ensure_link() {
            return Ok(());
        }

        if let Some(port) = self.config.meshtastic_port.clone() {
            return self.radio.connect(&port, self.preset).await;
        }

        let port = match self.radio_port.clone() {
            Some(port) => port,
            None => {
                let gps_port = self.config.gps_port.clone().or(self.gps.status().port);
                let exclude: Vec<String> = gps_port.into_iter().collect();
                let endpoint = locate(self.serial.as_ref(), DeviceKind::Radio, &exclude)?;
                info!("Auto-detected radio port {} ({})", endpoint.port, endpoint.description);
                self.radio_port = Some(endpoint.port.clone());
                endpoint.port
            }
        };

        let result = self.radio.connect(&port, self.preset).await;
        if result.is_err() {
            // Look again next time; the radio may have re-enumerated elsewhere
            self.radio_port = None;
        }
        result
    }

    /// Stop the GPS reader and close the radio
    pub async fn shutdown(&mut self) {
        self.gps.stop();
        self.radio.close().await;
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn radio(&self) -> &RadioSession<T> {
        &self.radio
    }

    pub fn gps(&self) -> &GpsSupervisor<S> {
        &self.gps
    }
}
