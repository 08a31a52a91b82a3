//! Acquisition setup
//!
//! One setup drives one movie from source resolution to a playable download:
//!
//! ```text
//! idle -> resolving-source -> awaiting-metadata -> awaiting-dual-readiness -> ready
//!                      \________________\___________________\_____________-> failed
//! ```
//!
//! Progress is published to any number of [`SetupObserver`]s. A late observer
//! first replays what already happened, so every observer sees the same
//! history.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::barrier::{Readiness, ReadinessGate};
use super::engine::{Engine, WeakEngine};
use super::error::{AcquireError, SetupError};
use super::instance::{DownloadInstance, InstanceEvent};
use crate::models::{
    ContentId, MovieHash, PreparedMovie, SetupPhase, Task, TaskEvent, TorrentCandidate,
};

const EVENT_CAPACITY: usize = 64;

type Outcome = Result<PreparedMovie, SetupError>;

/// Something an observer is told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupEvent {
    /// A task finished or failed
    Task(TaskEvent),
    /// The content hash of the movie file is known
    MovieHash(MovieHash),
    /// Languages of the subtitles fetched for the movie
    Subtitles(Vec<String>),
    /// Terminal: the movie can be served
    Ready(PreparedMovie),
    /// Terminal: the acquisition failed
    Failed(SetupError),
}

impl SetupEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupEvent::Ready(_) | SetupEvent::Failed(_))
    }
}

struct SetupState {
    phase: SetupPhase,
    candidate: Option<TorrentCandidate>,
    /// Instance this setup materialized
    owned: Option<ContentId>,
    history: Vec<SetupEvent>,
    cancelled: bool,
}

struct SetupShared {
    id: Uuid,
    movie_id: String,
    engine: WeakEngine,
    state: Mutex<SetupState>,
    events: broadcast::Sender<SetupEvent>,
    outcome: watch::Sender<Option<Outcome>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A running acquisition of one movie
#[derive(Clone)]
pub struct Setup {
    shared: Arc<SetupShared>,
}

impl Setup {
    pub(crate) fn new(movie_id: &str, engine: WeakEngine) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(SetupShared {
                id: Uuid::new_v4(),
                movie_id: movie_id.to_string(),
                engine,
                state: Mutex::new(SetupState {
                    phase: SetupPhase::Idle,
                    candidate: None,
                    owned: None,
                    history: Vec::new(),
                    cancelled: false,
                }),
                events,
                outcome,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn movie_id(&self) -> &str {
        &self.shared.movie_id
    }

    pub fn phase(&self) -> SetupPhase {
        self.shared.state.lock().phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// The torrent chosen for the movie, once resolved
    pub fn candidate(&self) -> Option<TorrentCandidate> {
        self.shared.state.lock().candidate.clone()
    }

    /// Observe this setup, starting with a replay of its history
    pub fn attach(&self) -> SetupObserver {
        let state = self.shared.state.lock();
        SetupObserver {
            backlog: state.history.iter().cloned().collect(),
            events: self.shared.events.subscribe(),
            outcome: self.shared.outcome.subscribe(),
            finished: false,
        }
    }

    /// Abort the setup, releasing any instance it materialized
    ///
    /// No effect once the setup is terminal.
    pub fn cancel(&self) {
        let task = {
            let mut state = self.shared.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.cancelled = true;
            current_task(state.phase)
        };
        if let Some(handle) = self.shared.task.lock().take() {
            handle.abort();
        }
        info!(movie = %self.shared.movie_id, "setup cancelled");
        self.fail(AcquireError::Cancelled.at(task));
    }

    pub(crate) fn start(&self, engine: Engine) {
        let mut task = self.shared.task.lock();
        if self.is_terminal() {
            return;
        }
        let setup = self.clone();
        *task = Some(tokio::spawn(async move { setup.run(engine).await }));
    }

    async fn run(self, engine: Engine) {
        if self.shared.state.lock().cancelled {
            return;
        }
        match self.acquire(&engine).await {
            Ok(prepared) => self.succeed(prepared),
            Err(err) => self.fail(err),
        }
    }

    // ===== Pipeline =====

    async fn acquire(&self, engine: &Engine) -> Result<PreparedMovie, SetupError> {
        let movie_id = self.movie_id();

        self.set_phase(SetupPhase::ResolvingSource);
        let candidate = engine
            .resolver()
            .resolve(movie_id)
            .await
            .map_err(|e| e.at(Task::Torrent))?;
        self.shared.state.lock().candidate = Some(candidate.clone());

        let reservation = engine
            .reserve(&candidate.content_id, Some(movie_id))
            .map_err(|e| e.at(Task::Torrent))?;
        self.emit(SetupEvent::Task(TaskEvent::done(Task::Torrent)));

        self.set_phase(SetupPhase::AwaitingMetadata);
        let instance = engine
            .materialize_reserved(reservation)
            .await
            .map_err(|e| e.at(Task::Metadata))?;
        {
            let mut state = self.shared.state.lock();
            state.owned = Some(candidate.content_id.clone());
            if state.cancelled {
                drop(state);
                engine.release(&candidate.content_id);
                return Err(AcquireError::Cancelled.at(Task::Metadata));
            }
        }
        self.emit(SetupEvent::Task(TaskEvent::done(Task::Metadata)));

        self.set_phase(SetupPhase::AwaitingDualReadiness);
        let (movie_hash, subtitles) = self.await_readiness(engine, &instance).await?;

        Ok(PreparedMovie {
            movie_id: movie_id.to_string(),
            candidate,
            file: instance.file().clone(),
            movie_hash,
            subtitles,
        })
    }

    /// Wait until the content hash is known and the playback buffer is downloaded
    ///
    /// Subtitles are fetched in the background as soon as the hash is known.
    /// Their languages are reported only if the fetch settled before the gate
    /// opened; a later fetch still fills the cache but is not waited for.
    async fn await_readiness(
        &self,
        engine: &Engine,
        instance: &Arc<DownloadInstance>,
    ) -> Result<(MovieHash, Vec<String>), SetupError> {
        let gate = ReadinessGate::new();
        let mut events = instance.subscribe();
        let mut hash: Option<MovieHash> = None;
        let mut subtitles = Vec::new();
        let mut fetch = SubtitleTask::default();

        instance.start_download();
        self.catch_up(engine, instance, &gate, &mut hash, &mut fetch);

        let timeout = engine.config().playback_timeout();
        let deadline = tokio::time::sleep(timeout.unwrap_or(Duration::MAX));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = gate.opened() => break,
                _ = &mut deadline, if timeout.is_some() && !gate.is_satisfied(Readiness::Playback) => {
                    let limit = timeout.unwrap_or_default();
                    warn!(movie = %self.shared.movie_id, ?limit, "playback buffer timeout");
                    return Err(AcquireError::PlaybackTimeout(limit).at(Task::FirstPieces));
                }
                result = fetch.settled() => self.on_subtitles(result, &mut subtitles),
                event = events.recv() => match event {
                    Ok(InstanceEvent::ContentHash(h)) => {
                        self.on_content_hash(engine, instance, &gate, h, &mut hash, &mut fetch);
                    }
                    Ok(InstanceEvent::Ready) => self.on_playable(&gate),
                    Ok(InstanceEvent::Piece(_)) | Ok(InstanceEvent::Idle) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(movie = %self.shared.movie_id, skipped, "observer lagged");
                        self.catch_up(engine, instance, &gate, &mut hash, &mut fetch);
                    }
                    Err(RecvError::Closed) => {
                        return Err(AcquireError::InstanceClosed.at(Task::FirstPieces));
                    }
                },
            }
        }

        if fetch.is_finished() {
            let result = fetch.settled().await;
            self.on_subtitles(result, &mut subtitles);
        } else {
            fetch.detach(&self.shared.movie_id);
        }

        // Stop listening; the instance stays registered
        drop(events);
        let hash = hash.ok_or_else(|| AcquireError::InstanceClosed.at(Task::FirstPieces))?;
        Ok((hash, subtitles))
    }

    /// Apply the instance's current snapshot
    fn catch_up(
        &self,
        engine: &Engine,
        instance: &Arc<DownloadInstance>,
        gate: &ReadinessGate,
        hash: &mut Option<MovieHash>,
        fetch: &mut SubtitleTask,
    ) {
        if let Some(h) = instance.content_hash() {
            self.on_content_hash(engine, instance, gate, h, hash, fetch);
        }
        if instance.is_playable() {
            self.on_playable(gate);
        }
    }

    fn on_content_hash(
        &self,
        engine: &Engine,
        instance: &Arc<DownloadInstance>,
        gate: &ReadinessGate,
        h: MovieHash,
        hash: &mut Option<MovieHash>,
        fetch: &mut SubtitleTask,
    ) {
        if hash.is_some() {
            return;
        }
        *hash = Some(h);
        self.emit(SetupEvent::MovieHash(h));

        let fetcher = engine.subtitles();
        let movie_id = self.shared.movie_id.clone();
        let size = instance.file().length;
        fetch.start(async move { fetcher.fetch(&movie_id, h, size).await });
        gate.satisfy(Readiness::ContentHash);
    }

    fn on_playable(&self, gate: &ReadinessGate) {
        if gate.satisfy(Readiness::Playback) {
            self.emit(SetupEvent::Task(TaskEvent::done(Task::FirstPieces)));
        }
    }

    fn on_subtitles(&self, result: anyhow::Result<Vec<String>>, subtitles: &mut Vec<String>) {
        match result {
            Ok(languages) => {
                *subtitles = languages.clone();
                self.emit(SetupEvent::Subtitles(languages));
                self.emit(SetupEvent::Task(TaskEvent::done(Task::Subtitles)));
            }
            Err(e) => {
                warn!(movie = %self.shared.movie_id, error = %e, "subtitles unavailable");
                self.emit(SetupEvent::Task(TaskEvent::error(Task::Subtitles)));
            }
        }
    }

    // ===== State transitions =====

    fn set_phase(&self, phase: SetupPhase) {
        let mut state = self.shared.state.lock();
        if !state.phase.is_terminal() {
            debug!(movie = %self.shared.movie_id, %phase, "setup phase");
            state.phase = phase;
        }
    }

    fn emit(&self, event: SetupEvent) {
        let mut state = self.shared.state.lock();
        state.history.push(event.clone());
        // No observers is fine
        let _ = self.shared.events.send(event);
    }

    fn succeed(&self, prepared: PreparedMovie) {
        {
            let mut state = self.shared.state.lock();
            if state.phase.is_terminal() || state.cancelled {
                return;
            }
            state.phase = SetupPhase::Ready;
        }
        info!(
            movie = %self.shared.movie_id,
            torrent = %prepared.candidate.content_id,
            hash = %prepared.movie_hash,
            "movie ready"
        );
        self.emit(SetupEvent::Ready(prepared.clone()));
        self.shared.outcome.send_replace(Some(Ok(prepared)));
        self.forget();
    }

    /// Report the failing task, release what this setup created, then go terminal
    fn fail(&self, err: SetupError) {
        let owned = {
            let mut state = self.shared.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = SetupPhase::Failed;
            state.owned.clone()
        };
        warn!(movie = %self.shared.movie_id, code = err.code(), error = %err, "setup failed");

        self.emit(SetupEvent::Task(TaskEvent::error(err.task)));
        if let (Some(id), Some(engine)) = (owned, self.shared.engine.upgrade()) {
            engine.release(&id);
        }
        self.emit(SetupEvent::Failed(err.clone()));
        self.shared.outcome.send_replace(Some(Err(err)));
        self.forget();
    }

    fn forget(&self) {
        if let Some(engine) = self.shared.engine.upgrade() {
            engine.forget_setup(&self.shared.movie_id, self.shared.id);
        }
    }
}

impl std::fmt::Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("id", &self.shared.id)
            .field("movie_id", &self.shared.movie_id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Task that would be running in a phase
fn current_task(phase: SetupPhase) -> Task {
    match phase {
        SetupPhase::Idle | SetupPhase::ResolvingSource => Task::Torrent,
        SetupPhase::AwaitingMetadata => Task::Metadata,
        SetupPhase::AwaitingDualReadiness | SetupPhase::Ready | SetupPhase::Failed => {
            Task::FirstPieces
        }
    }
}

/// Background subtitle fetch owned by one setup
///
/// Aborted when dropped, unless detached first.
#[derive(Default)]
struct SubtitleTask {
    handle: Option<JoinHandle<anyhow::Result<Vec<String>>>>,
}

impl SubtitleTask {
    fn start<F>(&mut self, fetch: F)
    where
        F: Future<Output = anyhow::Result<Vec<String>>> + Send + 'static,
    {
        self.handle = Some(tokio::spawn(fetch));
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Resolves when the fetch settles; pending forever when none is running
    async fn settled(&mut self) -> anyhow::Result<Vec<String>> {
        let result = match self.handle.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        };
        self.handle = None;
        result.map_err(anyhow::Error::from).and_then(|languages| languages)
    }

    /// Let a running fetch finish on its own
    fn detach(&mut self, movie_id: &str) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let movie_id = movie_id.to_string();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(languages)) => {
                    info!(movie = %movie_id, ?languages, "subtitles fetched after ready");
                }
                Ok(Err(e)) => warn!(movie = %movie_id, error = %e, "subtitles unavailable"),
                Err(e) => warn!(movie = %movie_id, error = %e, "subtitle task failed"),
            }
        });
    }
}

impl Drop for SubtitleTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// One caller's view of a setup
///
/// Dropping an observer has no effect on the setup or other observers.
pub struct SetupObserver {
    backlog: VecDeque<SetupEvent>,
    events: broadcast::Receiver<SetupEvent>,
    outcome: watch::Receiver<Option<Outcome>>,
    finished: bool,
}

impl SetupObserver {
    /// Next event, replayed history first; `None` after the terminal event
    pub async fn next(&mut self) -> Option<SetupEvent> {
        if self.finished {
            return None;
        }

        let event = match self.backlog.pop_front() {
            Some(event) => event,
            None => loop {
                match self.events.recv().await {
                    Ok(event) => break event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "setup observer lagged");
                    }
                    Err(RecvError::Closed) => {
                        self.finished = true;
                        return None;
                    }
                }
            },
        };

        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    /// Wait for the terminal outcome
    pub async fn wait(mut self) -> Result<PreparedMovie, SetupError> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(AcquireError::Cancelled.at(Task::Torrent))),
            Err(_) => Err(AcquireError::Cancelled.at(Task::Torrent)),
        }
    }
}

impl std::fmt::Debug for SetupObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupObserver")
            .field("backlog", &self.backlog.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Setup {
        Setup::new("tt0111161", WeakEngine::dangling())
    }

    #[tokio::test]
    async fn test_late_observer_replays_history() {
        let setup = setup();
        setup.emit(SetupEvent::Task(TaskEvent::done(Task::Torrent)));
        setup.emit(SetupEvent::Task(TaskEvent::done(Task::Metadata)));

        let mut late = setup.attach();
        assert_eq!(
            late.next().await,
            Some(SetupEvent::Task(TaskEvent::done(Task::Torrent)))
        );
        assert_eq!(
            late.next().await,
            Some(SetupEvent::Task(TaskEvent::done(Task::Metadata)))
        );

        setup.emit(SetupEvent::MovieHash(MovieHash(7)));
        assert_eq!(late.next().await, Some(SetupEvent::MovieHash(MovieHash(7))));
    }

    #[tokio::test]
    async fn test_cancel_is_terminal_once() {
        let setup = setup();
        let mut observer = setup.attach();
        setup.cancel();
        setup.cancel();

        assert_eq!(setup.phase(), SetupPhase::Failed);
        assert_eq!(
            observer.next().await,
            Some(SetupEvent::Task(TaskEvent::error(Task::Torrent)))
        );
        assert!(matches!(observer.next().await, Some(SetupEvent::Failed(_))));
        assert_eq!(observer.next().await, None);

        let err = setup.attach().wait().await.unwrap_err();
        assert_eq!(err.source, AcquireError::Cancelled);
    }

    #[tokio::test]
    async fn test_subtitle_task_settles_once() {
        let mut fetch = SubtitleTask::default();
        fetch.start(async { Ok(vec!["eng".to_string()]) });
        assert_eq!(fetch.settled().await.unwrap(), vec!["eng"]);
        assert!(!fetch.is_finished());
    }

    #[tokio::test]
    async fn test_subtitle_task_aborts_on_drop() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut fetch = SubtitleTask::default();
        fetch.start(async move {
            let _tx = tx;
            std::future::pending().await
        });
        drop(fetch);
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_current_task_follows_phase() {
        assert_eq!(current_task(SetupPhase::ResolvingSource), Task::Torrent);
        assert_eq!(current_task(SetupPhase::AwaitingMetadata), Task::Metadata);
        assert_eq!(
            current_task(SetupPhase::AwaitingDualReadiness),
            Task::FirstPieces
        );
    }
}
