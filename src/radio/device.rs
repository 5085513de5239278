//! Meshtastic radio over USB serial, backed by the `meshtastic` crate

use async_trait::async_trait;
use meshtastic::api::state::Configured;
use meshtastic::api::{ConnectedStreamApi, StreamApi};
use meshtastic::packet::{PacketDestination, PacketReceiver, PacketRouter};
use meshtastic::protobufs::{self, from_radio, mesh_packet, to_radio};
use meshtastic::utils;
use meshtastic::Message as ProstMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::link::{MeshLink, MeshTransport, NodeSummary};
use super::node_id::NodeId;
use super::preset::ModemPreset;
use crate::error::{PingerError, Result};

/// What the packet task has learned from the radio
#[derive(Debug, Default)]
struct RadioState {
    my_node_num: Option<u32>,
    lora: Option<protobufs::config::LoRaConfig>,
    nodes: HashMap<u32, NodeSummary>,
}

impl RadioState {
    fn latest_snr(&self) -> Option<f32> {
        self.nodes
            .values()
            .filter(|n| n.snr.is_some() && Some(n.node.num()) != self.my_node_num)
            .max_by_key(|n| n.last_heard)
            .and_then(|n| n.snr)
    }

    fn apply(&mut self, variant: from_radio::PayloadVariant) -> bool {
        match variant {
            from_radio::PayloadVariant::MyInfo(info) => {
                debug!("Radio node number is {}", NodeId(info.my_node_num));
                self.my_node_num = Some(info.my_node_num);
            }
            from_radio::PayloadVariant::NodeInfo(info) => {
                self.nodes.insert(
                    info.num,
                    NodeSummary {
                        node: NodeId(info.num),
                        snr: Some(info.snr),
                        last_heard: info.last_heard,
                    },
                );
            }
            from_radio::PayloadVariant::Config(config) => {
                if let Some(protobufs::config::PayloadVariant::Lora(lora)) = config.payload_variant {
                    self.lora = Some(lora);
                }
            }
            from_radio::PayloadVariant::Packet(packet) => {
                if packet.rx_snr != 0.0 {
                    let entry = self.nodes.entry(packet.from).or_insert(NodeSummary {
                        node: NodeId(packet.from),
                        snr: None,
                        last_heard: 0,
                    });
                    entry.snr = Some(packet.rx_snr);
                    entry.last_heard = entry.last_heard.max(packet.rx_time);
                }
            }
            from_radio::PayloadVariant::ConfigCompleteId(_) => return true,
            _ => {}
        }
        false
    }
}

/// Outgoing packets only; replies are tracked by the packet task
struct SendRouter {
    source: u32,
}

impl PacketRouter<(), std::io::Error> for SendRouter {
    fn handle_packet_from_radio(&mut self, _packet: protobufs::FromRadio) -> std::result::Result<(), std::io::Error> {
        Ok(())
    }

    fn handle_mesh_packet(&mut self, _packet: protobufs::MeshPacket) -> std::result::Result<(), std::io::Error> {
        Ok(())
    }

    fn source_node_id(&self) -> meshtastic::types::NodeId {
        self.source.into()
    }
}

/// Opens Meshtastic radios attached over serial
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshtasticTransport;

#[async_trait]
impl MeshTransport for MeshtasticTransport {
    async fn connect(&self, port: &str, preset: ModemPreset) -> Result<Box<dyn MeshLink>> {
        let stream = utils::stream::build_serial_stream(port.to_string(), None, None, None)
            .map_err(|e| PingerError::Connect(format!("Failed to open {}: {}", port, e)))?;

        let (receiver, connected) = StreamApi::new().connect(stream).await;
        let api = connected
            .configure(utils::generate_rand_id())
            .await
            .map_err(|e| PingerError::Connect(format!("Configuration request to {} failed: {}", port, e)))?;

        let state = Arc::new(Mutex::new(RadioState::default()));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let processor = spawn_packet_task(receiver, state.clone(), alive.clone(), ready_tx);

        let mut link = MeshtasticLink {
            api: Some(api),
            state,
            alive,
            processor: Some(processor),
        };

        // The radio streams its node table and config, then a completion marker
        if ready_rx.await.is_err() {
            let _ = link.close().await;
            return Err(PingerError::Connect(format!("Radio on {} closed the stream during configuration", port)));
        }

        if let Err(e) = link.apply_preset(preset).await {
            warn!("Could not apply radio mode {}: {}", preset, e);
        }

        Ok(Box::new(link))
    }
}

fn spawn_packet_task(
    mut receiver: PacketReceiver,
    state: Arc<Mutex<RadioState>>,
    alive: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        while let Some(packet) = receiver.recv().await {
            let Some(variant) = packet.payload_variant else {
                continue;
            };
            let complete = state.lock().await.apply(variant);
            if complete {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        info!("Radio packet stream ended");
    })
}

/// Configured connection to one radio
pub struct MeshtasticLink {
    api: Option<ConnectedStreamApi<Configured>>,
    state: Arc<Mutex<RadioState>>,
    alive: Arc<AtomicBool>,
    processor: Option<JoinHandle<()>>,
}

impl MeshtasticLink {
    fn api(&mut self) -> Result<&mut ConnectedStreamApi<Configured>> {
        self.api.as_mut().ok_or_else(|| PingerError::Send("radio link is closed".to_string()))
    }

    /// Switch the radio to `preset` if it reports a different one
    async fn apply_preset(&mut self, preset: ModemPreset) -> Result<()> {
        let (my_node_num, lora) = {
            let state = self.state.lock().await;
            (state.my_node_num, state.lora.clone())
        };

        let Some(mut lora) = lora else {
            warn!("Radio did not report its LoRa config; leaving modem preset unchanged");
            return Ok(());
        };
        if lora.use_preset && lora.modem_preset == preset.code() {
            debug!("Radio already using {}", preset);
            return Ok(());
        }

        lora.use_preset = true;
        lora.modem_preset = preset.code();

        let admin = protobufs::AdminMessage {
            payload_variant: Some(protobufs::admin_message::PayloadVariant::SetConfig(protobufs::Config {
                payload_variant: Some(protobufs::config::PayloadVariant::Lora(lora)),
            })),
            ..Default::default()
        };
        let packet = protobufs::MeshPacket {
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(protobufs::Data {
                portnum: protobufs::PortNum::AdminApp as i32,
                payload: admin.encode_to_vec(),
                ..Default::default()
            })),
            to: my_node_num.unwrap_or(0),
            priority: mesh_packet::Priority::Reliable as i32,
            ..Default::default()
        };

        self.api()?
            .send_to_radio_packet(Some(to_radio::PayloadVariant::Packet(packet)))
            .await
            .map_err(|e| PingerError::Send(format!("SetConfig failed: {}", e)))?;

        info!("Radio modem preset set to {}", preset);
        Ok(())
    }
}

#[async_trait]
impl MeshLink for MeshtasticLink {
    async fn send_text(&mut self, target: NodeId, text: &str, want_ack: bool) -> Result<()> {
        if !self.is_alive() {
            return Err(PingerError::Send("radio packet stream has ended".to_string()));
        }
        let source = self.state.lock().await.my_node_num.unwrap_or(0);
        let mut router = SendRouter { source };

        self.api()?
            .send_text(
                &mut router,
                text.to_string(),
                PacketDestination::Node(target.num().into()),
                want_ack,
                0u32.into(),
            )
            .await
            .map_err(|e| PingerError::Send(format!("Radio rejected message to {}: {}", target, e)))
    }

    async fn lookup_node(&self, node: NodeId) -> Option<NodeSummary> {
        self.state.lock().await.nodes.get(&node.num()).copied()
    }

    async fn latest_snr(&self) -> Option<f32> {
        self.state.lock().await.latest_snr()
    }

    fn is_alive(&self) -> bool {
        self.api.is_some() && self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(processor) = self.processor.take() {
            processor.abort();
        }
        self.alive.store(false, Ordering::SeqCst);
        if let Some(api) = self.api.take() {
            api.disconnect()
                .await
                .map_err(|e| PingerError::Io(std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }
}

impl Drop for MeshtasticLink {
    fn drop(&mut self) {
        if let Some(processor) = self.processor.take() {
            processor.abort();
        }
    }
}
