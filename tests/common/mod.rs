//! Shared test doubles: a scripted swarm, a fixed torrent index and a
//! controllable subtitle fetcher.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use reelseed::config::EngineConfig;
use reelseed::stream::{
    Discovery, Engine, PeerSwarm, SetupEvent, SetupObserver, SubtitleFetcher, Swarm, SwarmEvent,
};
use reelseed::{
    ContentId, MovieHash, Quality, SourceResolver, SourceType, TorrentCandidate, TorrentFile,
    TorrentIndex, TorrentMetadata,
};

pub const PIECE: u64 = 16 * 1024;
pub const MOVIE: &str = "tt0111161";

pub fn content_id(n: u8) -> ContentId {
    ContentId::parse(&format!("{:040x}", n)).unwrap()
}

// =============================================================================
// Swarm
// =============================================================================

#[derive(Default)]
pub struct FakeSwarm {
    pub prioritized: Mutex<Option<RangeInclusive<u32>>>,
    pub reannounces: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl FakeSwarm {
    pub fn reannounces(&self) -> usize {
        self.reannounces.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl PeerSwarm for FakeSwarm {
    fn prioritize(&self, pieces: RangeInclusive<u32>) {
        *self.prioritized.lock() = Some(pieces);
    }

    fn reannounce(&self) {
        self.reannounces.fetch_add(1, Ordering::SeqCst);
    }

    fn peer_speeds(&self) -> Vec<u64> {
        vec![100, 200]
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test side of a joined swarm
pub struct SwarmHandle {
    pub content_id: ContentId,
    pub swarm: Arc<FakeSwarm>,
    pub tx: mpsc::UnboundedSender<SwarmEvent>,
}

impl SwarmHandle {
    /// Deliver metadata and report the swarm connected
    pub fn connect(&self, metadata: TorrentMetadata) {
        let _ = self.tx.send(SwarmEvent::Metadata(metadata));
        let _ = self.tx.send(SwarmEvent::Connected);
    }

    pub fn pieces(&self, indexes: impl IntoIterator<Item = u32>) {
        for index in indexes {
            let _ = self.tx.send(SwarmEvent::Piece {
                index,
                data: Bytes::from(vec![index as u8; PIECE as usize]),
            });
        }
    }
}

/// Discovery whose swarms are driven by the test
pub struct FakeDiscovery {
    joins: mpsc::UnboundedSender<SwarmHandle>,
}

impl FakeDiscovery {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SwarmHandle>) {
        let (joins, rx) = mpsc::unbounded_channel();
        (Self { joins }, rx)
    }
}

impl Discovery for FakeDiscovery {
    fn join(&self, content_id: &ContentId) -> Swarm {
        let (tx, events) = mpsc::unbounded_channel();
        let swarm = Arc::new(FakeSwarm::default());
        let _ = self.joins.send(SwarmHandle {
            content_id: content_id.clone(),
            swarm: swarm.clone(),
            tx,
        });
        Swarm {
            control: swarm,
            events,
        }
    }
}

pub async fn next_join(joins: &mut mpsc::UnboundedReceiver<SwarmHandle>) -> SwarmHandle {
    tokio::time::timeout(Duration::from_secs(5), joins.recv())
        .await
        .expect("no swarm joined")
        .expect("discovery dropped")
}

/// 40 pieces of 16 KiB: a 3-piece extra, then a 37-piece movie
///
/// The movie's hash windows are pieces 3..=6 and 36..=39; its playback
/// window is 3..13.
pub fn movie_metadata() -> TorrentMetadata {
    with_files(&["extras.nfo", "movie.mp4"])
}

/// Same geometry with custom file names
pub fn with_files(names: &[&str]) -> TorrentMetadata {
    let lengths = [3 * PIECE, 37 * PIECE];
    let mut offset = 0;
    let files = names
        .iter()
        .zip(lengths)
        .map(|(name, length)| {
            let file = TorrentFile {
                name: name.to_string(),
                offset,
                length,
            };
            offset += length;
            file
        })
        .collect();
    TorrentMetadata {
        files,
        length: 40 * PIECE,
        piece_length: PIECE,
        last_piece_length: PIECE,
        pieces: 40,
    }
}

pub const HASH_PIECES: [u32; 8] = [3, 4, 5, 6, 36, 37, 38, 39];

// =============================================================================
// Index
// =============================================================================

/// Index answering every movie with the same list
pub struct FixedIndex(pub Vec<TorrentCandidate>);

#[async_trait]
impl TorrentIndex for FixedIndex {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn search(&self, _imdb_id: &str) -> anyhow::Result<Vec<TorrentCandidate>> {
        Ok(self.0.clone())
    }
}

pub fn candidate(n: u8, seeds: u32) -> TorrentCandidate {
    TorrentCandidate::new(content_id(n), seeds, Quality::FHD1080p, SourceType::Bluray)
}

// =============================================================================
// Subtitles
// =============================================================================

#[derive(Default)]
pub struct FakeSubtitles {
    pub fail: bool,
    /// Never settle
    pub hang: bool,
    pub calls: Mutex<Vec<(String, MovieHash, u64)>>,
}

#[async_trait]
impl SubtitleFetcher for FakeSubtitles {
    async fn fetch(&self, movie_id: &str, hash: MovieHash, file_size: u64) -> anyhow::Result<Vec<String>> {
        self.calls.lock().push((movie_id.to_string(), hash, file_size));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            anyhow::bail!("subtitle addon unreachable");
        }
        Ok(vec!["eng".to_string()])
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct Harness {
    pub engine: Engine,
    pub joins: mpsc::UnboundedReceiver<SwarmHandle>,
    pub subtitles: Arc<FakeSubtitles>,
}

pub fn harness(config: EngineConfig, candidates: Vec<TorrentCandidate>) -> Harness {
    harness_with_subtitles(config, candidates, FakeSubtitles::default())
}

pub fn harness_with_subtitles(
    config: EngineConfig,
    candidates: Vec<TorrentCandidate>,
    subtitles: FakeSubtitles,
) -> Harness {
    let (discovery, joins) = FakeDiscovery::new();
    let subtitles = Arc::new(subtitles);
    let resolver = SourceResolver::new(vec![Arc::new(FixedIndex(candidates))]);
    let engine = Engine::new(config, Arc::new(discovery), resolver, subtitles.clone());
    Harness {
        engine,
        joins,
        subtitles,
    }
}

pub async fn next_event(observer: &mut SetupObserver) -> SetupEvent {
    tokio::time::timeout(Duration::from_secs(5), observer.next())
        .await
        .expect("timed out waiting for a setup event")
        .expect("observer finished")
}

/// Poll a condition until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
