//! reelseed - stream-first movie acquisition over BitTorrent
//!
//! Picks a torrent for a movie, downloads the start of its video file ahead
//! of everything else and computes the file's content hash so subtitles for
//! the exact release can be fetched while the download continues.
//!
//! # Modules
//!
//! - `models` - Content ids, torrent candidates, file geometry, task events
//! - `api` - Torrent index clients (YTS, apibay) and source selection
//! - `stream` - Engine, download instances, setup orchestration, subtitles
//! - `config` - TOML configuration
//! - `cli` / `commands` - The `reelseed` binary

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod models;
pub mod stream;

// Re-export commonly used types
pub use models::{
    ContentId, FileMetadata, MovieHash, PreparedMovie, Quality, SetupPhase, SourceType, Task,
    TaskEvent, TaskStatus, TorrentCandidate, TorrentFile, TorrentMetadata,
};

pub use api::{SourceResolver, TorrentIndex};
pub use config::Config;
pub use stream::{AcquireError, Engine, SetupError, SetupEvent, SetupObserver};
