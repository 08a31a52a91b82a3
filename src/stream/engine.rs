//! Torrent engine
//!
//! Process-wide registry of download instances and in-flight setups. The
//! engine enforces the concurrency ceiling, validates torrent metadata, picks
//! the movie file and owns one maintenance task per registered instance.
//!
//! Every registry mutation happens under a single lock that is never held
//! across an await, so admission checks and registration are atomic.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::discovery::{Discovery, PeerSwarm, Swarm, SwarmEvent};
use super::error::{AcquireError, SetupError};
use super::instance::{DownloadInstance, InstanceEvent};
use super::setup::{Setup, SetupObserver};
use super::subtitles::{SubtitleClient, SubtitleFetcher};
use crate::api::SourceResolver;
use crate::config::{Config, EngineConfig};
use crate::models::{ContentId, FileMetadata, Task, TorrentMetadata};

// =============================================================================
// Registry
// =============================================================================

struct Registered {
    instance: Arc<DownloadInstance>,
    driver: JoinHandle<()>,
    maintenance: JoinHandle<()>,
}

struct SetupEntry {
    setup: Setup,
    /// Content id the setup is acquiring, once resolved
    content_id: Option<ContentId>,
}

#[derive(Default)]
struct Registry {
    instances: HashMap<ContentId, Registered>,
    /// Ids whose instance is being materialized
    reserved: HashSet<ContentId>,
    setups: HashMap<String, SetupEntry>,
}

impl Registry {
    /// Live instances plus in-flight acquisitions
    ///
    /// A setup linked to a reserved or registered id is already counted
    /// through that id.
    fn load(&self) -> usize {
        let unlinked = self
            .setups
            .values()
            .filter(|entry| match &entry.content_id {
                Some(id) => !self.instances.contains_key(id) && !self.reserved.contains(id),
                None => true,
            })
            .count();
        self.instances.len() + self.reserved.len() + unlinked
    }

    fn holds(&self, content_id: &ContentId) -> bool {
        self.instances.contains_key(content_id) || self.reserved.contains(content_id)
    }
}

/// Snapshot of the engine for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub instances: usize,
    pub materializing: usize,
    pub setups: usize,
    pub ceiling: usize,
    /// Bytes per second across every instance
    pub throughput: u64,
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct EngineInner {
    config: EngineConfig,
    discovery: Arc<dyn Discovery>,
    resolver: SourceResolver,
    subtitles: Arc<dyn SubtitleFetcher>,
    registry: Mutex<Registry>,
}

/// Handle to the process-wide torrent engine
///
/// Cloning is cheap; every clone shares the same registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle held by setups and driver tasks
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|inner| Engine { inner })
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        WeakEngine(Weak::new())
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        discovery: Arc<dyn Discovery>,
        resolver: SourceResolver,
        subtitles: Arc<dyn SubtitleFetcher>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                discovery,
                resolver,
                subtitles,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Engine wired to the configured indexes and subtitle addon
    pub fn from_config(config: &Config, discovery: Arc<dyn Discovery>) -> Self {
        let resolver =
            SourceResolver::with_base_urls(&config.sources.yts_url, &config.sources.bay_url);
        let subtitles = Arc::new(SubtitleClient::new(&config.subtitles));
        Self::new(config.engine.clone(), discovery, resolver, subtitles)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn resolver(&self) -> &SourceResolver {
        &self.inner.resolver
    }

    pub(crate) fn subtitles(&self) -> Arc<dyn SubtitleFetcher> {
        self.inner.subtitles.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    // ===== Acquisition =====

    /// Start acquiring a movie, or attach to the acquisition already running for it
    ///
    /// Fails on the `torrent` task when the engine is disabled or the
    /// concurrency ceiling is reached; a rejected request leaves the registry
    /// untouched.
    pub fn prepare(&self, movie_id: &str) -> Result<SetupObserver, SetupError> {
        if !self.inner.config.enabled {
            return Err(AcquireError::EngineDisabled.at(Task::Torrent));
        }

        let setup = {
            let mut registry = self.inner.registry.lock();
            if let Some(entry) = registry.setups.get(movie_id) {
                debug!(movie = movie_id, "attaching to running setup");
                return Ok(entry.setup.attach());
            }
            if registry.load() >= self.inner.config.max_instances {
                warn!(movie = movie_id, "engine at capacity");
                return Err(AcquireError::CapacityExceeded.at(Task::Torrent));
            }

            let setup = Setup::new(movie_id, self.downgrade());
            registry.setups.insert(
                movie_id.to_string(),
                SetupEntry {
                    setup: setup.clone(),
                    content_id: None,
                },
            );
            setup
        };

        info!(movie = movie_id, setup = %setup.id(), "starting setup");
        let observer = setup.attach();
        setup.start(self.clone());
        Ok(observer)
    }

    /// Running setup for a movie, if any
    pub fn setup(&self, movie_id: &str) -> Option<Setup> {
        self.inner
            .registry
            .lock()
            .setups
            .get(movie_id)
            .map(|entry| entry.setup.clone())
    }

    /// Abort the running setup for a movie; returns false if there is none
    pub fn cancel_setup(&self, movie_id: &str) -> bool {
        match self.setup(movie_id) {
            Some(setup) => {
                setup.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a terminal setup from the registry
    pub(crate) fn forget_setup(&self, movie_id: &str, id: Uuid) {
        let mut registry = self.inner.registry.lock();
        if registry
            .setups
            .get(movie_id)
            .is_some_and(|entry| entry.setup.id() == id)
        {
            registry.setups.remove(movie_id);
        }
    }

    /// Whether a new acquisition would currently be admitted
    pub fn admission_check(&self) -> bool {
        self.inner.registry.lock().load() < self.inner.config.max_instances
    }

    // ===== Instances =====

    /// Claim a content id for materialization
    ///
    /// Fails with `DuplicateAcquisition` if the id is registered or being
    /// materialized, and with `CapacityExceeded` if the claim would exceed the
    /// ceiling. When `movie_id` names a running setup, the setup is linked to
    /// the id so the acquisition is counted once.
    pub(crate) fn reserve(
        &self,
        content_id: &ContentId,
        movie_id: Option<&str>,
    ) -> Result<Reservation, AcquireError> {
        let mut registry = self.inner.registry.lock();
        if registry.holds(content_id) {
            return Err(AcquireError::DuplicateAcquisition(content_id.clone()));
        }

        let previous_link = movie_id
            .and_then(|m| registry.setups.get_mut(m))
            .map(|entry| entry.content_id.replace(content_id.clone()));
        registry.reserved.insert(content_id.clone());

        if registry.load() > self.inner.config.max_instances {
            registry.reserved.remove(content_id);
            if let (Some(m), Some(previous)) = (movie_id, previous_link) {
                if let Some(entry) = registry.setups.get_mut(m) {
                    entry.content_id = previous;
                }
            }
            return Err(AcquireError::CapacityExceeded);
        }

        debug!(torrent = %content_id, "reserved");
        Ok(Reservation {
            engine: self.clone(),
            content_id: content_id.clone(),
            swarm: None,
            committed: false,
        })
    }

    /// Join the swarm for a content id and register its download instance
    ///
    /// Returns once metadata is validated and the swarm is connected.
    pub async fn materialize(
        &self,
        content_id: &ContentId,
    ) -> Result<Arc<DownloadInstance>, AcquireError> {
        let reservation = self.reserve(content_id, None)?;
        self.materialize_reserved(reservation).await
    }

    pub(crate) async fn materialize_reserved(
        &self,
        mut reservation: Reservation,
    ) -> Result<Arc<DownloadInstance>, AcquireError> {
        let content_id = reservation.content_id.clone();
        info!(torrent = %content_id, "joining swarm");
        let Swarm {
            control,
            mut events,
        } = self.inner.discovery.join(&content_id);
        reservation.swarm = Some(control.clone());

        let deadline = self.inner.config.metadata_timeout();
        let instance = match tokio::time::timeout(
            deadline,
            self.await_metadata(&content_id, control, &mut events),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(torrent = %content_id, ?deadline, "metadata timeout");
                return Err(AcquireError::MetadataTimeout(deadline));
            }
        };

        self.commit(reservation, instance.clone(), events);
        Ok(instance)
    }

    /// Wait for metadata and a connected swarm
    async fn await_metadata(
        &self,
        content_id: &ContentId,
        control: Arc<dyn PeerSwarm>,
        events: &mut mpsc::UnboundedReceiver<SwarmEvent>,
    ) -> Result<Arc<DownloadInstance>, AcquireError> {
        let mut instance: Option<Arc<DownloadInstance>> = None;
        let mut connected = false;

        loop {
            if connected {
                if let Some(instance) = &instance {
                    return Ok(instance.clone());
                }
            }

            let Some(event) = events.recv().await else {
                warn!(torrent = %content_id, "swarm ended before metadata");
                return Err(AcquireError::MetadataTimeout(
                    self.inner.config.metadata_timeout(),
                ));
            };

            match event {
                SwarmEvent::Metadata(metadata) if instance.is_none() => {
                    let file =
                        select_movie_file(&metadata, &self.inner.config.supported_extensions)?;
                    info!(
                        torrent = %content_id,
                        file = %file.name,
                        pieces = file.piece_count(),
                        "metadata received"
                    );
                    instance = Some(Arc::new(DownloadInstance::new(
                        content_id.clone(),
                        file,
                        control.clone(),
                        self.inner.config.playback_buffer_pieces,
                    )));
                }
                SwarmEvent::Metadata(_) => {}
                SwarmEvent::Connected => connected = true,
                SwarmEvent::Piece { index, data } => match &instance {
                    Some(instance) => {
                        instance.record_piece(index, &data);
                    }
                    None => debug!(torrent = %content_id, index, "piece before metadata"),
                },
                SwarmEvent::Stalled => {}
            }
        }
    }

    /// Register an instance with its driver and maintenance tasks
    fn commit(
        &self,
        mut reservation: Reservation,
        instance: Arc<DownloadInstance>,
        events: mpsc::UnboundedReceiver<SwarmEvent>,
    ) {
        let content_id = instance.content_id().clone();
        let mut registry = self.inner.registry.lock();

        let driver = tokio::spawn(drive(
            self.downgrade(),
            instance.clone(),
            events,
            self.inner.config.release_on_complete,
        ));
        let maintenance = tokio::spawn(maintain(
            instance.clone(),
            self.inner.config.refresh_interval(),
        ));

        registry.reserved.remove(&content_id);
        registry.instances.insert(
            content_id.clone(),
            Registered {
                instance,
                driver,
                maintenance,
            },
        );
        reservation.committed = true;
        info!(torrent = %content_id, instances = registry.instances.len(), "instance registered");
    }

    /// Tear down an instance; a no-op for unknown ids
    ///
    /// Returns whether an instance was removed.
    pub fn release(&self, content_id: &ContentId) -> bool {
        let removed = {
            let mut registry = self.inner.registry.lock();
            registry.instances.remove(content_id).map(|entry| {
                entry.driver.abort();
                entry.maintenance.abort();
                entry.instance
            })
        };

        match removed {
            Some(instance) => {
                instance.close();
                info!(torrent = %content_id, "instance released");
                true
            }
            None => {
                debug!(torrent = %content_id, "release of unknown torrent");
                false
            }
        }
    }

    pub fn contains(&self, content_id: &ContentId) -> bool {
        self.inner.registry.lock().instances.contains_key(content_id)
    }

    pub fn instance(&self, content_id: &ContentId) -> Option<Arc<DownloadInstance>> {
        self.inner
            .registry
            .lock()
            .instances
            .get(content_id)
            .map(|entry| entry.instance.clone())
    }

    fn instances(&self) -> Vec<Arc<DownloadInstance>> {
        self.inner
            .registry
            .lock()
            .instances
            .values()
            .map(|entry| entry.instance.clone())
            .collect()
    }

    /// Sum of every peer's download speed across all instances, in bytes per second
    pub fn aggregate_throughput(&self) -> u64 {
        self.instances().iter().map(|i| i.download_speed()).sum()
    }

    pub fn stats(&self) -> EngineStats {
        let (instances, materializing, setups) = {
            let registry = self.inner.registry.lock();
            (
                registry.instances.len(),
                registry.reserved.len(),
                registry.setups.len(),
            )
        };
        EngineStats {
            instances,
            materializing,
            setups,
            ceiling: self.inner.config.max_instances,
            throughput: self.aggregate_throughput(),
        }
    }

    /// Cancel every setup and release every instance
    pub fn shutdown(&self) {
        let setups: Vec<Setup> = {
            let registry = self.inner.registry.lock();
            registry.setups.values().map(|e| e.setup.clone()).collect()
        };
        for setup in setups {
            setup.cancel();
        }

        let ids: Vec<ContentId> = self.inner.registry.lock().instances.keys().cloned().collect();
        for id in ids {
            self.release(&id);
        }
        info!("engine shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("Engine")
            .field("instances", &registry.instances.len())
            .field("reserved", &registry.reserved.len())
            .field("setups", &registry.setups.len())
            .finish()
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Claim on a content id while its instance is materialized
///
/// Dropping an uncommitted reservation frees the id and shuts the swarm down.
pub(crate) struct Reservation {
    engine: Engine,
    content_id: ContentId,
    swarm: Option<Arc<dyn PeerSwarm>>,
    committed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.engine
            .inner
            .registry
            .lock()
            .reserved
            .remove(&self.content_id);
        if let Some(swarm) = self.swarm.take() {
            swarm.shutdown();
        }
        debug!(torrent = %self.content_id, "reservation dropped");
    }
}

// =============================================================================
// Background tasks
// =============================================================================

/// Feed swarm events into the instance
async fn drive(
    engine: WeakEngine,
    instance: Arc<DownloadInstance>,
    mut events: mpsc::UnboundedReceiver<SwarmEvent>,
    release_on_complete: bool,
) {
    while let Some(event) = events.recv().await {
        match event {
            SwarmEvent::Piece { index, data } => {
                let published = instance.record_piece(index, &data);
                if release_on_complete && published.contains(&InstanceEvent::Idle) {
                    if let Some(engine) = engine.upgrade() {
                        engine.release(instance.content_id());
                    }
                    return;
                }
            }
            SwarmEvent::Stalled => instance.record_stall(),
            SwarmEvent::Metadata(_) | SwarmEvent::Connected => {}
        }
    }
    debug!(torrent = %instance.content_id(), "swarm event stream ended");
}

/// Periodically replenish the peer set
async fn maintain(instance: Arc<DownloadInstance>, period: std::time::Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        instance.refresh();
    }
}

// =============================================================================
// Metadata validation
// =============================================================================

/// Pick the movie file out of a torrent
///
/// Extensions are tried in priority order; the first one matching any file
/// wins and the first non-empty file with it (in metadata order) is the movie
/// file. Matching is a case-insensitive suffix test. A file that does not fit
/// inside the torrent's pieces is rejected.
pub fn select_movie_file(
    metadata: &TorrentMetadata,
    extensions: &[String],
) -> Result<FileMetadata, AcquireError> {
    if metadata.files.is_empty() {
        return Err(AcquireError::UnsupportedMetadata(
            "torrent lists no files".to_string(),
        ));
    }
    if metadata.piece_length == 0 || metadata.pieces == 0 {
        return Err(AcquireError::UnsupportedMetadata(
            "torrent has no pieces".to_string(),
        ));
    }

    for extension in extensions {
        let extension = extension.to_lowercase();
        if let Some(file) = metadata
            .files
            .iter()
            .find(|f| f.length > 0 && f.name.to_lowercase().ends_with(&extension))
        {
            let within = file
                .offset
                .checked_add(file.length)
                .is_some_and(|end| end <= metadata.length);
            let selected = within.then(|| FileMetadata::new(metadata, file));
            return match selected {
                Some(selected) if selected.end_piece < metadata.pieces => Ok(selected),
                _ => Err(AcquireError::UnsupportedMetadata(format!(
                    "{} lies outside the torrent's pieces",
                    file.name
                ))),
            };
        }
    }

    Err(AcquireError::UnsupportedMetadata(format!(
        "none of {} files has a supported extension",
        metadata.files.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TorrentFile;

    fn metadata(names: &[&str]) -> TorrentMetadata {
        let files = names
            .iter()
            .enumerate()
            .map(|(i, name)| TorrentFile {
                name: name.to_string(),
                offset: i as u64 * 1000,
                length: 1000,
            })
            .collect::<Vec<_>>();
        let length = files.len() as u64 * 1000;
        TorrentMetadata {
            files,
            length,
            piece_length: 256,
            last_piece_length: 256,
            pieces: length.div_ceil(256) as u32,
        }
    }

    fn extensions() -> Vec<String> {
        vec![".mp4".into(), ".mkv".into()]
    }

    #[test]
    fn test_extension_priority_beats_file_order() {
        let meta = metadata(&["Movie.mkv", "sample.mp4", "movie.mp4"]);
        let file = select_movie_file(&meta, &extensions()).unwrap();
        assert_eq!(file.name, "sample.mp4");
        assert_eq!(file.offset, 1000);
    }

    #[test]
    fn test_extension_match_ignores_case() {
        let meta = metadata(&["readme.txt", "MOVIE.MKV"]);
        let file = select_movie_file(&meta, &extensions()).unwrap();
        assert_eq!(file.name, "MOVIE.MKV");
        assert_eq!(file.start_piece, 3);
    }

    #[test]
    fn test_unsupported_metadata() {
        let meta = metadata(&["readme.txt", "cover.jpg"]);
        assert!(matches!(
            select_movie_file(&meta, &extensions()),
            Err(AcquireError::UnsupportedMetadata(_))
        ));

        let empty = metadata(&[]);
        assert!(matches!(
            select_movie_file(&empty, &extensions()),
            Err(AcquireError::UnsupportedMetadata(_))
        ));
    }

    #[test]
    fn test_empty_files_are_skipped() {
        let mut meta = metadata(&["sample.mp4", "movie.mp4"]);
        meta.files[0].length = 0;
        let file = select_movie_file(&meta, &extensions()).unwrap();
        assert_eq!(file.name, "movie.mp4");

        meta.files[1].length = 0;
        assert!(matches!(
            select_movie_file(&meta, &extensions()),
            Err(AcquireError::UnsupportedMetadata(_))
        ));
    }

    #[test]
    fn test_file_outside_pieces_is_rejected() {
        let mut meta = metadata(&["readme.txt", "movie.mp4"]);
        meta.pieces = 4;
        assert!(matches!(
            select_movie_file(&meta, &extensions()),
            Err(AcquireError::UnsupportedMetadata(_))
        ));

        let mut meta = metadata(&["movie.mp4"]);
        meta.files[0].length = 5000;
        assert!(matches!(
            select_movie_file(&meta, &extensions()),
            Err(AcquireError::UnsupportedMetadata(_))
        ));
    }

    #[test]
    fn test_registry_load_counts_linked_setup_once() {
        let id = ContentId::parse(&"ab".repeat(20)).unwrap();
        let mut registry = Registry::default();
        registry.reserved.insert(id.clone());
        assert_eq!(registry.load(), 1);
        assert!(registry.holds(&id));
    }
}
