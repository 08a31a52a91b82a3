//! Swarm discovery capability
//!
//! Peer discovery, metadata exchange and the peer-wire protocol live outside
//! this crate. A [`Discovery`] implementation joins the swarm for a content id
//! and reports what happens through a channel of [`SwarmEvent`]s; the
//! returned [`PeerSwarm`] is the control surface for that swarm.

use bytes::Bytes;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::{ContentId, TorrentMetadata};

/// Something that happened in a swarm
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// The info dictionary has been fetched
    Metadata(TorrentMetadata),
    /// Peers are connected and piece requests can be issued
    Connected,
    /// A piece was downloaded and verified against its digest
    Piece { index: u32, data: Bytes },
    /// No peer activity for a while
    Stalled,
}

/// Control surface of a joined swarm
pub trait PeerSwarm: Send + Sync {
    /// Request the given pieces ahead of everything else
    fn prioritize(&self, pieces: RangeInclusive<u32>);

    /// Announce again to trackers and the DHT to find more peers
    fn reannounce(&self);

    /// Current download speed of each connected peer, in bytes per second
    fn peer_speeds(&self) -> Vec<u64>;

    /// Disconnect every peer and stop discovery
    fn shutdown(&self);
}

/// A freshly joined swarm
pub struct Swarm {
    pub control: Arc<dyn PeerSwarm>,
    pub events: mpsc::UnboundedReceiver<SwarmEvent>,
}

/// Joins swarms
pub trait Discovery: Send + Sync {
    fn join(&self, content_id: &ContentId) -> Swarm;
}
