//! # Radio Module
//!
//! Connection to the Meshtastic radio the fixes are sent through.
//!
//! This module handles:
//! - The connect/send/close state machine ([`RadioSession`])
//! - Parsing node ids and modem presets from configuration
//! - The `meshtastic` crate backed transport ([`device::MeshtasticTransport`])
//!
//! The session is deliberately binary: any send failure drops the link, and
//! the next cycle reconnects from scratch.

pub mod device;
pub mod link;
pub mod node_id;
pub mod preset;

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{PingerError, Result};
use crate::state::LinkState;
pub use link::{MeshLink, MeshTransport, NodeSummary};
pub use node_id::NodeId;
pub use preset::ModemPreset;

/// Default time the radio gets to finish its configuration handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Firmware value meaning "no SNR recorded"
const SNR_UNSET: f32 = -128.0;

/// Owns the connection to the mesh radio
pub struct RadioSession<T: MeshTransport> {
    transport: T,
    link: Option<Box<dyn MeshLink>>,
    state: LinkState,
    port: Option<String>,
    connect_timeout: Duration,
}

impl<T: MeshTransport> std::fmt::Debug for RadioSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioSession")
            .field("state", &self.state)
            .field("port", &self.port)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl<T: MeshTransport> RadioSession<T> {
    pub fn new(transport: T, connect_timeout: Duration) -> Self {
        Self {
            transport,
            link: None,
            state: LinkState::Disconnected,
            port: None,
            connect_timeout,
        }
    }

    /// Open the radio on `port` and apply `preset`
    ///
    /// Any existing link is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`PingerError::Connect`] if the port cannot be opened or the
    /// radio does not finish its handshake within the connect timeout.
    pub async fn connect(&mut self, port: &str, preset: ModemPreset) -> Result<()> {
        self.close().await;

        info!("Connecting to Meshtastic radio on {} (timeout={:?})", port, self.connect_timeout);
        self.state = LinkState::Connecting;

        let result = match timeout(self.connect_timeout, self.transport.connect(port, preset)).await {
            Ok(result) => result,
            Err(_) => Err(PingerError::Connect(format!(
                "radio on {} did not become ready within {:?}",
                port, self.connect_timeout
            ))),
        };

        match result {
            Ok(link) => {
                info!("Radio connected on {} (mode {})", port, preset);
                self.link = Some(link);
                self.port = Some(port.to_string());
                self.state = LinkState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(match e {
                    PingerError::Connect(_) => e,
                    other => PingerError::Connect(format!("{}: {}", port, other)),
                })
            }
        }
    }

    /// Send `text` to `target`
    ///
    /// # Errors
    ///
    /// - [`PingerError::Connect`] if the session is not connected
    /// - [`PingerError::Send`] if the target is unknown to the radio or the
    ///   radio rejects the message
    ///
    /// Every failure leaves the session disconnected.
    pub async fn send_direct_message(&mut self, target: NodeId, text: &str, want_ack: bool) -> Result<()> {
        if !self.ensure_link() {
            return Err(PingerError::Connect("radio is not connected".to_string()));
        }
        let Some(link) = self.link.as_mut() else {
            return Err(PingerError::Connect("radio is not connected".to_string()));
        };

        let result = match link.lookup_node(target).await {
            Some(_) => link.send_text(target, text, want_ack).await,
            None => Err(PingerError::Send(format!("node {} is not in the radio's node table", target))),
        };

        match result {
            Ok(()) => {
                debug!("Sent {} bytes to {}", text.len(), target);
                Ok(())
            }
            Err(e) => {
                self.demote().await;
                Err(match e {
                    PingerError::Send(_) => e,
                    other => PingerError::Send(other.to_string()),
                })
            }
        }
    }

    /// Release the connection; safe to call at any time
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                debug!("Error closing radio link: {}", e);
            }
            info!("Radio on {} closed", self.port.as_deref().unwrap_or("?"));
        }
        self.state = LinkState::Disconnected;
    }

    /// Whether a usable link is open; demotes the session if the link died
    pub fn ensure_link(&mut self) -> bool {
        match &self.link {
            Some(link) if link.is_alive() => true,
            Some(_) => {
                warn!("Radio link on {} dropped", self.port.as_deref().unwrap_or("?"));
                self.link = None;
                self.state = LinkState::Disconnected;
                false
            }
            None => false,
        }
    }

    /// Last SNR the radio heard from `target`
    pub async fn target_snr(&self, target: NodeId) -> Option<f32> {
        let link = self.link.as_ref()?;
        link.lookup_node(target).await.and_then(|n| n.snr).filter(|&snr| snr != SNR_UNSET)
    }

    /// SNR of the node the radio heard most recently
    pub async fn radio_snr(&self) -> Option<f32> {
        let link = self.link.as_ref()?;
        link.latest_snr().await.filter(|&snr| snr != SNR_UNSET)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Port of the current or most recent connection
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    async fn demote(&mut self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::link::mocks::MockRadio;
    use super::*;

    const TARGET: NodeId = NodeId(0xa1b2_c3d4);

    fn session(radio: &MockRadio) -> RadioSession<MockRadio> {
        RadioSession::new(radio.clone(), DEFAULT_CONNECT_TIMEOUT)
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let radio = MockRadio::with_node(TARGET, Some(6.5));
        let mut session = session(&radio);
        assert_eq!(session.state(), LinkState::Disconnected);

        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();
        assert_eq!(session.state(), LinkState::Connected);
        assert_eq!(session.port(), Some("/dev/ttyUSB0"));

        session.send_direct_message(TARGET, "hello", true).await.unwrap();
        assert_eq!(radio.sent_texts(), vec!["hello".to_string()]);
        assert_eq!(session.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let radio = MockRadio::with_node(TARGET, None);
        radio.fail_connects(1);
        let mut session = session(&radio);

        let result = session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await;
        assert!(matches!(result, Err(PingerError::Connect(_))));
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_without_connect_is_connect_error() {
        let radio = MockRadio::with_node(TARGET, None);
        let mut session = session(&radio);

        let result = session.send_direct_message(TARGET, "hello", true).await;
        assert!(matches!(result, Err(PingerError::Connect(_))));
        assert!(radio.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_demotes_session() {
        let radio = MockRadio::with_node(TARGET, None);
        let mut session = session(&radio);
        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();

        radio.fail_next_send();
        let first = session.send_direct_message(TARGET, "one", true).await;
        assert!(matches!(first, Err(PingerError::Send(_))));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(radio.closes.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Not implicitly reusable: the next send needs a fresh connect
        let second = session.send_direct_message(TARGET, "two", true).await;
        assert!(matches!(second, Err(PingerError::Connect(_))));

        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();
        session.send_direct_message(TARGET, "three", true).await.unwrap();
        assert_eq!(radio.sent_texts(), vec!["three".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_target_is_send_error() {
        let radio = MockRadio::with_node(NodeId(1), None);
        let mut session = session(&radio);
        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();

        match session.send_direct_message(TARGET, "hello", true).await {
            Err(PingerError::Send(msg)) => assert!(msg.contains("!a1b2c3d4")),
            other => panic!("Expected Send error, got: {:?}", other),
        }
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_dropped_link_is_detected() {
        let radio = MockRadio::with_node(TARGET, None);
        let mut session = session(&radio);
        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();

        radio.drop_link();
        assert!(!session.ensure_link());
        assert_eq!(session.state(), LinkState::Disconnected);

        let result = session.send_direct_message(TARGET, "hello", true).await;
        assert!(matches!(result, Err(PingerError::Connect(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let radio = MockRadio::with_node(TARGET, None);
        let mut session = session(&radio);
        session.close().await;
        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(radio.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snr_lookup() {
        let radio = MockRadio::with_node(TARGET, Some(-7.25));
        let mut session = session(&radio);
        assert_eq!(session.target_snr(TARGET).await, None);

        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();
        assert_eq!(session.target_snr(TARGET).await, Some(-7.25));
        assert_eq!(session.radio_snr().await, Some(-7.25));
        assert_eq!(session.target_snr(NodeId(42)).await, None);
    }

    #[tokio::test]
    async fn test_unset_snr_is_ignored() {
        let radio = MockRadio::with_node(TARGET, Some(SNR_UNSET));
        let mut session = session(&radio);
        session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await.unwrap();
        assert_eq!(session.target_snr(TARGET).await, None);
    }

    struct HangingTransport;

    #[async_trait::async_trait]
    impl MeshTransport for HangingTransport {
        async fn connect(&self, _port: &str, _preset: ModemPreset) -> Result<Box<dyn MeshLink>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let mut session = RadioSession::new(HangingTransport, Duration::from_secs(20));
        let started = tokio::time::Instant::now();

        match session.connect("/dev/ttyUSB0", ModemPreset::LongFast).await {
            Err(PingerError::Connect(msg)) => assert!(msg.contains("did not become ready")),
            other => panic!("Expected Connect timeout, got: {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(session.state(), LinkState::Disconnected);
    }
}
