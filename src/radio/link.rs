//! Trait abstraction for the mesh radio client to enable testing

use async_trait::async_trait;

use super::node_id::NodeId;
use super::preset::ModemPreset;
use crate::error::Result;

/// What the radio's node table knows about a peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSummary {
    pub node: NodeId,
    /// SNR of the last packet heard from the node, in dB
    pub snr: Option<f32>,
    /// Seconds since epoch the node was last heard, 0 if never
    pub last_heard: u32,
}

/// Opens connections to a mesh radio
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Open `port`, finish the configuration handshake and apply `preset`
    async fn connect(&self, port: &str, preset: ModemPreset) -> Result<Box<dyn MeshLink>>;
}

/// One open connection to a mesh radio
#[async_trait]
pub trait MeshLink: Send + Sync {
    /// Queue a text message for a single node
    async fn send_text(&mut self, target: NodeId, text: &str, want_ack: bool) -> Result<()>;

    /// Look a node up in the radio's node table
    async fn lookup_node(&self, node: NodeId) -> Option<NodeSummary>;

    /// SNR of whichever node was heard most recently
    async fn latest_snr(&self) -> Option<f32>;

    /// False once the radio's packet stream has ended
    fn is_alive(&self) -> bool;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}
