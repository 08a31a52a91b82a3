//! Simulated swarm
//!
//! A [`Discovery`] that serves a synthetic two-file torrent from memory with
//! configurable delays. Used by `reelseed prepare --simulate` to exercise the
//! whole pipeline without a peer-wire backend.

use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::debug;

use super::discovery::{Discovery, PeerSwarm, Swarm, SwarmEvent};
use crate::models::{ContentId, TorrentFile, TorrentMetadata};

/// Shape and pacing of the simulated torrent
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub movie_name: String,
    pub movie_length: u64,
    pub piece_length: u64,
    pub metadata_delay: Duration,
    pub piece_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            movie_name: "Movie.2010.1080p.BluRay.x264.mp4".to_string(),
            movie_length: 8 * 1024 * 1024,
            piece_length: 256 * 1024,
            metadata_delay: Duration::from_millis(300),
            piece_delay: Duration::from_millis(20),
        }
    }
}

impl SimConfig {
    /// Metadata of the simulated torrent: a small text file, then the movie
    pub fn metadata(&self) -> TorrentMetadata {
        let readme = TorrentFile {
            name: "README.txt".to_string(),
            offset: 0,
            length: 1000,
        };
        let movie = TorrentFile {
            name: self.movie_name.clone(),
            offset: readme.length,
            length: self.movie_length,
        };
        let length = readme.length + movie.length;
        let piece_length = self.piece_length.max(1);
        let pieces = length.div_ceil(piece_length) as u32;

        TorrentMetadata {
            files: vec![readme, movie],
            length,
            piece_length,
            last_piece_length: length - (pieces as u64 - 1) * piece_length,
            pieces,
        }
    }
}

/// Deterministic content of a piece
pub fn piece_data(metadata: &TorrentMetadata, index: u32) -> Bytes {
    let start = index as u64 * metadata.piece_length;
    let len = if index + 1 == metadata.pieces {
        metadata.last_piece_length
    } else {
        metadata.piece_length
    };
    (start..start + len)
        .map(|offset| (offset.wrapping_mul(31) % 251) as u8)
        .collect()
}

/// Discovery serving simulated swarms
#[derive(Debug, Clone, Default)]
pub struct SimulatedDiscovery {
    config: SimConfig,
}

impl SimulatedDiscovery {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }
}

impl Discovery for SimulatedDiscovery {
    fn join(&self, content_id: &ContentId) -> Swarm {
        let (tx, events) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        let swarm = Arc::new(SimSwarm {
            priority: Mutex::new(None),
            prioritized: Notify::new(),
            stop,
            announces: AtomicU64::new(0),
            speed: bytes_per_second(&self.config),
        });

        debug!(torrent = %content_id, "joining simulated swarm");
        tokio::spawn(serve(swarm.clone(), self.config.clone(), tx));

        Swarm {
            control: swarm,
            events,
        }
    }
}

/// Control surface of one simulated swarm
pub struct SimSwarm {
    priority: Mutex<Option<RangeInclusive<u32>>>,
    prioritized: Notify,
    stop: watch::Sender<bool>,
    announces: AtomicU64,
    speed: u64,
}

impl SimSwarm {
    pub fn announces(&self) -> u64 {
        self.announces.load(Ordering::Relaxed)
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

impl PeerSwarm for SimSwarm {
    fn prioritize(&self, pieces: RangeInclusive<u32>) {
        *self.priority.lock() = Some(pieces);
        self.prioritized.notify_one();
    }

    fn reannounce(&self) {
        self.announces.fetch_add(1, Ordering::Relaxed);
    }

    fn peer_speeds(&self) -> Vec<u64> {
        if self.is_stopped() {
            Vec::new()
        } else {
            vec![self.speed / 2, self.speed - self.speed / 2]
        }
    }

    fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

fn bytes_per_second(config: &SimConfig) -> u64 {
    let millis = config.piece_delay.as_millis().max(1) as u64;
    config.piece_length * 1000 / millis
}

/// Prioritized pieces first, then the rest in index order
fn schedule(pieces: u32, priority: Option<RangeInclusive<u32>>) -> Vec<u32> {
    let mut order: Vec<u32> = priority
        .clone()
        .map(|range| range.filter(|&i| i < pieces).collect())
        .unwrap_or_default();
    order.extend((0..pieces).filter(|i| !priority.as_ref().is_some_and(|r| r.contains(i))));
    order
}

async fn serve(swarm: Arc<SimSwarm>, config: SimConfig, tx: mpsc::UnboundedSender<SwarmEvent>) {
    let mut stop = swarm.stop.subscribe();
    let metadata = config.metadata();

    tokio::select! {
        _ = tokio::time::sleep(config.metadata_delay) => {}
        _ = stopped(&mut stop) => return,
    }
    if tx.send(SwarmEvent::Metadata(metadata.clone())).is_err()
        || tx.send(SwarmEvent::Connected).is_err()
    {
        return;
    }

    // Give the instance a moment to ask for its file first
    let grace = config.piece_delay.max(Duration::from_millis(50)) * 5;
    let _ = tokio::time::timeout(grace, swarm.prioritized.notified()).await;
    let order = schedule(metadata.pieces, swarm.priority.lock().clone());

    for index in order {
        tokio::select! {
            _ = tokio::time::sleep(config.piece_delay) => {}
            _ = stopped(&mut stop) => return,
        }
        let data = piece_data(&metadata, index);
        if tx.send(SwarmEvent::Piece { index, data }).is_err() {
            return;
        }
    }

    // Seed until shut down
    stopped(&mut stop).await;
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
