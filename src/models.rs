//! Data structures and types for reelseed
//!
//! Contains all shared models used across the crate organized by domain:
//! - **Sources**: torrent candidates returned by the torrent indexes
//! - **Torrent**: content ids, metadata and the selected movie file
//! - **Progress**: task notifications streamed to callers
//! - **Subtitles**: the content hash used for subtitle matching

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Source Models (YTS / apibay)
// =============================================================================

/// 40-character hex info-hash naming a torrent's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

/// Reasons a string is not a valid content id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentIdError {
    #[error("invalid content id length: {0} (expected 40)")]
    Length(usize),

    #[error("content id contains non-hexadecimal characters")]
    NotHex,
}

impl ContentId {
    /// Parse and normalize (lowercase) a content id
    pub fn parse(s: &str) -> Result<Self, ContentIdError> {
        let s = s.trim();
        if s.len() != 40 {
            return Err(ContentIdError::Length(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ContentIdError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = ContentIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> String {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Release quality label as reported by the indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quality {
    #[serde(rename = "720p")]
    HD720p,
    #[serde(rename = "1080p")]
    FHD1080p,
    #[serde(rename = "web")]
    Web,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl Quality {
    /// Parse an index quality label ("720p", "1080p", "web"); anything else is unknown
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "720p" => Quality::HD720p,
            "1080p" => Quality::FHD1080p,
            "web" => Quality::Web,
            _ => Quality::Unknown,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::HD720p => write!(f, "720p"),
            Quality::FHD1080p => write!(f, "1080p"),
            Quality::Web => write!(f, "web"),
            Quality::Unknown => write!(f, "unknown"),
        }
    }
}

/// Origin of the release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Bluray,
    Web,
    #[default]
    Unknown,
}

impl SourceType {
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "bluray" => SourceType::Bluray,
            "web" => SourceType::Web,
            _ => SourceType::Unknown,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Bluray => write!(f, "bluray"),
            SourceType::Web => write!(f, "web"),
            SourceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// A torrent offered by one of the indexes for the requested movie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentCandidate {
    pub content_id: ContentId,
    pub seeds: u32,
    pub quality: Quality,
    pub source_type: SourceType,
}

impl TorrentCandidate {
    pub fn new(content_id: ContentId, seeds: u32, quality: Quality, source_type: SourceType) -> Self {
        Self {
            content_id,
            seeds,
            quality,
            source_type,
        }
    }

    /// Bluray release of the given quality
    pub fn is_bluray(&self, quality: Quality) -> bool {
        self.quality == quality && self.source_type == SourceType::Bluray
    }
}

impl fmt::Display for TorrentCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {} 👤{}",
            self.quality, self.source_type, self.content_id, self.seeds
        )
    }
}

// =============================================================================
// Torrent Models
// =============================================================================

/// A file entry in the torrent's info dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub name: String,
    /// Byte offset of the file within the concatenated torrent data
    pub offset: u64,
    pub length: u64,
}

/// Torrent metadata as delivered by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    pub files: Vec<TorrentFile>,
    /// Total length of all files
    pub length: u64,
    pub piece_length: u64,
    pub last_piece_length: u64,
    /// Number of pieces
    pub pieces: u32,
}

/// The movie file selected out of a torrent, with its piece geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    pub total_length: u64,
    pub piece_length: u64,
    pub last_piece_length: u64,
    pub pieces: u32,
    /// First piece holding bytes of this file
    pub start_piece: u32,
    /// Last piece holding bytes of this file (inclusive)
    pub end_piece: u32,
}

impl FileMetadata {
    /// Build the file geometry for one file of the torrent
    pub fn new(metadata: &TorrentMetadata, file: &TorrentFile) -> Self {
        let piece_length = metadata.piece_length.max(1);
        let start_piece = (file.offset / piece_length) as u32;
        let end_piece = if file.length == 0 {
            start_piece
        } else {
            ((file.offset + file.length - 1) / piece_length) as u32
        };

        Self {
            name: file.name.clone(),
            offset: file.offset,
            length: file.length,
            total_length: metadata.length,
            piece_length: metadata.piece_length,
            last_piece_length: metadata.last_piece_length,
            pieces: metadata.pieces,
            start_piece,
            end_piece,
        }
    }

    /// Number of pieces covering this file
    pub fn piece_count(&self) -> u32 {
        self.end_piece - self.start_piece + 1
    }

    /// Length in bytes of a piece of the torrent
    pub fn piece_size(&self, index: u32) -> u64 {
        if self.pieces > 0 && index == self.pieces - 1 {
            self.last_piece_length
        } else {
            self.piece_length
        }
    }

    /// Torrent-global byte offset where a piece starts
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }
}

/// OpenSubtitles content hash of the movie file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MovieHash(pub u64);

impl fmt::Display for MovieHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<MovieHash> for String {
    fn from(hash: MovieHash) -> String {
        hash.to_string()
    }
}

impl TryFrom<String> for MovieHash {
    type Error = std::num::ParseIntError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        u64::from_str_radix(&s, 16).map(MovieHash)
    }
}

// =============================================================================
// Progress Models
// =============================================================================

/// Named stage of a movie acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Task {
    Torrent,
    Metadata,
    Subtitles,
    FirstPieces,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Torrent => write!(f, "torrent"),
            Task::Metadata => write!(f, "metadata"),
            Task::Subtitles => write!(f, "subtitles"),
            Task::FirstPieces => write!(f, "firstPieces"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Done,
    Error,
}

/// Progress notification sent to callers, e.g. `{"task":"metadata","status":"done"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task: Task,
    pub status: TaskStatus,
}

impl TaskEvent {
    pub fn done(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Done,
        }
    }

    pub fn error(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Error,
        }
    }
}

/// Phase of an acquisition setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupPhase {
    Idle,
    ResolvingSource,
    AwaitingMetadata,
    AwaitingDualReadiness,
    Ready,
    Failed,
}

impl SetupPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupPhase::Ready | SetupPhase::Failed)
    }
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupPhase::Idle => "idle",
            SetupPhase::ResolvingSource => "resolving-source",
            SetupPhase::AwaitingMetadata => "awaiting-metadata",
            SetupPhase::AwaitingDualReadiness => "awaiting-dual-readiness",
            SetupPhase::Ready => "ready",
            SetupPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything the surrounding system needs to start serving a prepared movie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedMovie {
    pub movie_id: String,
    pub candidate: TorrentCandidate,
    pub file: FileMetadata,
    pub movie_hash: MovieHash,
    pub subtitles: Vec<String>,
}
