//! Acquisition infrastructure
//!
//! - Engine: registry of downloads, admission and metadata validation
//! - Instance: piece tracking, content hash and playback readiness
//! - Setup: per-movie pipeline with its two-condition barrier
//! - Subtitles: Stremio OpenSubtitles addon integration
//! - Discovery / Sim: the swarm capability and a simulated implementation

pub mod barrier;
pub mod bitfield;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod instance;
pub mod moviehash;
pub mod setup;
pub mod sim;
pub mod subtitles;

pub use discovery::{Discovery, PeerSwarm, Swarm, SwarmEvent};
pub use engine::{select_movie_file, Engine, EngineStats};
pub use error::{AcquireError, SetupError};
pub use instance::{DownloadInstance, InstanceEvent};
pub use setup::{Setup, SetupEvent, SetupObserver};
pub use sim::{SimConfig, SimulatedDiscovery};
pub use subtitles::{SubtitleClient, SubtitleFetcher};
