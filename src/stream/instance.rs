//! Download instance
//!
//! Tracks piece-level progress of one torrent and derives the two readiness
//! signals the acquisition waits for: the content hash of the movie file and
//! a contiguous playback buffer at the start of it.

use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::bitfield::Bitfield;
use super::discovery::PeerSwarm;
use super::moviehash::HashSampler;
use crate::models::{ContentId, FileMetadata, MovieHash};

const EVENT_CAPACITY: usize = 256;

/// Notifications published by a download instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// A piece was downloaded and verified
    Piece(u32),
    /// The content hash became known (published once)
    ContentHash(MovieHash),
    /// The playback buffer is complete (published once)
    Ready,
    /// Peer activity stalled, or the whole movie file is downloaded
    Idle,
}

#[derive(Debug)]
struct InstanceState {
    bitfield: Bitfield,
    sampler: HashSampler,
    content_hash: Option<MovieHash>,
    ready: bool,
    complete: bool,
}

/// Piece tracking for one registered torrent
pub struct DownloadInstance {
    content_id: ContentId,
    file: FileMetadata,
    swarm: Arc<dyn PeerSwarm>,
    buffer_pieces: u32,
    state: Mutex<InstanceState>,
    events: Mutex<Option<broadcast::Sender<InstanceEvent>>>,
}

impl DownloadInstance {
    /// Create an instance for the selected movie file
    ///
    /// `buffer_pieces` is the number of leading pieces of the file that must be
    /// present before playback can start.
    pub fn new(
        content_id: ContentId,
        file: FileMetadata,
        swarm: Arc<dyn PeerSwarm>,
        buffer_pieces: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = InstanceState {
            bitfield: Bitfield::new(file.pieces),
            sampler: HashSampler::new(&file),
            content_hash: None,
            ready: false,
            complete: false,
        };

        Self {
            content_id,
            file,
            swarm,
            buffer_pieces: buffer_pieces.max(1),
            state: Mutex::new(state),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    /// The movie file inside the torrent
    pub fn file(&self) -> &FileMetadata {
        &self.file
    }

    /// Subscribe to instance events
    ///
    /// Subscribe before reading [`content_hash`](Self::content_hash) or
    /// [`is_playable`](Self::is_playable) so no event falls between the
    /// snapshot and the subscription. The receiver reports `Closed` once the
    /// instance is closed.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        match self.events.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn content_hash(&self) -> Option<MovieHash> {
        self.state.lock().content_hash
    }

    /// Whether the playback buffer is complete
    pub fn is_playable(&self) -> bool {
        self.state.lock().ready
    }

    /// Whether every piece of the movie file is present
    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.state.lock().bitfield.get(index)
    }

    /// Fraction of the movie file's pieces downloaded (0.0 to 1.0)
    pub fn progress(&self) -> f32 {
        let state = self.state.lock();
        let have = self.file_pieces().filter(|&i| state.bitfield.get(i)).count();
        have as f32 / self.file.piece_count() as f32
    }

    /// Pieces that must be present before playback can start
    pub fn playback_window(&self) -> Range<u32> {
        let start = self.file.start_piece;
        let end = start
            .saturating_add(self.buffer_pieces)
            .min(self.file.end_piece + 1);
        start..end
    }

    /// Start fetching the movie file's pieces ahead of the rest of the torrent
    pub fn start_download(&self) {
        debug!(
            torrent = %self.content_id,
            pieces = ?(self.file.start_piece..=self.file.end_piece),
            "prioritizing movie file"
        );
        self.swarm
            .prioritize(self.file.start_piece..=self.file.end_piece);
    }

    /// Look for more peers without touching progress
    pub fn refresh(&self) {
        trace!(torrent = %self.content_id, "re-announcing");
        self.swarm.reannounce();
    }

    /// Sum of the connected peers' download speeds, in bytes per second
    pub fn download_speed(&self) -> u64 {
        self.swarm.peer_speeds().iter().sum()
    }

    /// Record a verified piece and publish what it changed
    ///
    /// Returns the published events. A piece that was already recorded
    /// publishes nothing.
    pub fn record_piece(&self, index: u32, data: &Bytes) -> Vec<InstanceEvent> {
        let mut published = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.bitfield.set(index) {
                return published;
            }
            published.push(InstanceEvent::Piece(index));

            if state.content_hash.is_none() {
                if let Some(hash) = state.sampler.offer(index, data) {
                    info!(torrent = %self.content_id, %hash, "content hash computed");
                    state.content_hash = Some(hash);
                    published.push(InstanceEvent::ContentHash(hash));
                }
            }

            if !state.ready && state.bitfield.all_set(self.playback_window()) {
                info!(torrent = %self.content_id, "playback buffer complete");
                state.ready = true;
                published.push(InstanceEvent::Ready);
            }

            if !state.complete
                && state
                    .bitfield
                    .all_set(self.file.start_piece..self.file.end_piece + 1)
            {
                info!(torrent = %self.content_id, "movie file complete");
                state.complete = true;
                published.push(InstanceEvent::Idle);
            }
        }

        for event in &published {
            self.publish(event.clone());
        }
        published
    }

    /// Record that the swarm stopped delivering
    pub fn record_stall(&self) {
        debug!(torrent = %self.content_id, "swarm stalled");
        self.publish(InstanceEvent::Idle);
    }

    /// Disconnect from the swarm and detach every listener
    pub fn close(&self) {
        self.swarm.shutdown();
        self.events.lock().take();
    }

    fn publish(&self, event: InstanceEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            // No subscribers is fine
            let _ = sender.send(event);
        }
    }

    fn file_pieces(&self) -> impl Iterator<Item = u32> {
        self.file.start_piece..=self.file.end_piece
    }
}

impl std::fmt::Debug for DownloadInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadInstance")
            .field("content_id", &self.content_id)
            .field("file", &self.file.name)
            .finish_non_exhaustive()
    }
}
