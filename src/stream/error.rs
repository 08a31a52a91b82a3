//! Acquisition error types
//!
//! Every failure is attributed to the task that was running so callers can
//! render a task-specific error.

use std::time::Duration;
use thiserror::Error;

use crate::models::{ContentId, Task};

/// Failures of the acquisition pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("No torrents with seeders")]
    NoSeedsAvailable,

    #[error("Too many active downloads, try again later")]
    CapacityExceeded,

    #[error("Torrent {0} is already being downloaded")]
    DuplicateAcquisition(ContentId),

    #[error("No metadata received within {0:?}")]
    MetadataTimeout(Duration),

    #[error("Unsupported torrent metadata: {0}")]
    UnsupportedMetadata(String),

    #[error("Torrent engine is disabled")]
    EngineDisabled,

    #[error("First pieces not downloaded within {0:?}")]
    PlaybackTimeout(Duration),

    #[error("Download instance was closed")]
    InstanceClosed,

    #[error("Acquisition cancelled")]
    Cancelled,
}

impl AcquireError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::NoSeedsAvailable => "torrent_no_seed",
            AcquireError::CapacityExceeded => "torrent_max_instances",
            AcquireError::DuplicateAcquisition(_) => "torrent_duplicate",
            AcquireError::MetadataTimeout(_) => "torrent_no_metadata",
            AcquireError::UnsupportedMetadata(_) => "torrent_invalid_metadata",
            AcquireError::EngineDisabled => "torrent_engine_disabled",
            AcquireError::PlaybackTimeout(_) => "torrent_playback_timeout",
            AcquireError::InstanceClosed => "torrent_closed",
            AcquireError::Cancelled => "torrent_cancelled",
        }
    }

    /// Attribute this error to a task
    pub fn at(self, task: Task) -> SetupError {
        SetupError { task, source: self }
    }
}

/// An acquisition failure together with the task at which it occurred
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{task} task failed: {source}")]
pub struct SetupError {
    pub task: Task,
    #[source]
    pub source: AcquireError,
}

impl SetupError {
    pub fn code(&self) -> &'static str {
        self.source.code()
    }
}
