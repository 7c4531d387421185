//! The change-aggregation engine.
//!
//! A [`ChangeAggregator`] seeds a baseline of modification times for the
//! watched paths, consumes the raw notification stream from its transport,
//! and folds it into a deduplicated pending batch that is emitted once
//! activity has been quiet for a full debounce interval.
//!
//! All state mutation happens under one lock: notification delivery, timer
//! firing, and baseline-scan completion are serialized against each other,
//! so firing the timer and clearing the pending batch are a single atomic
//! step from the perspective of any concurrently arriving event.

use crate::config::WatchConfiguration;
use crate::error::{Error, Result};
use crate::events::{AggregatedBatch, PathEvent, WatcherEvent};
use crate::resolution::ResolutionEstimator;
use crate::scan;
use crate::subscription::{BatchTranslator, SubscriptionAdapter};
use crate::transport::{NotificationBatch, Since, Transport};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started, or the previous attempt was torn down.
    Idle,
    /// Baseline scan in flight; live events are queued, not applied.
    ScanningBaseline,
    /// Live events are applied and aggregated.
    Active,
    /// Events are dropped until the next `watch()` call resumes.
    Paused,
    /// The session is finished and the transport released.
    Closed,
}

/// Paths accumulated between debounce resets.
///
/// A path lives in at most one of the two sets; a later event for the same
/// path overwrites its classification.
#[derive(Debug, Default)]
struct PendingBatch {
    changed: BTreeSet<PathBuf>,
    removed: BTreeSet<PathBuf>,
}

impl PendingBatch {
    fn note_change(&mut self, path: PathBuf) {
        self.removed.remove(&path);
        self.changed.insert(path);
    }

    fn note_removal(&mut self, path: PathBuf) {
        self.changed.remove(&path);
        self.removed.insert(path);
    }

    fn take(&mut self, cursor: Option<String>) -> AggregatedBatch {
        AggregatedBatch {
            changes: std::mem::take(&mut self.changed).into_iter().collect(),
            removals: std::mem::take(&mut self.removed).into_iter().collect(),
            cursor,
        }
    }
}

/// Events that arrived while the baseline scan was still running.
///
/// Keyed by path with last-write-wins semantics: a later event replaces the
/// stored one but keeps the original queue position. Replayed once, in
/// arrival order, when the scan completes.
#[derive(Debug, Default)]
struct ScanQueue {
    order: Vec<PathBuf>,
    entries: HashMap<PathBuf, PathEvent>,
}

impl ScanQueue {
    fn push(&mut self, event: PathEvent) {
        let path = event.path().to_path_buf();
        if self.entries.insert(path.clone(), event).is_none() {
            self.order.push(path);
        }
    }

    fn drain(&mut self) -> Vec<PathEvent> {
        let mut entries = std::mem::take(&mut self.entries);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|path| entries.remove(&path))
            .collect()
    }
}

struct InnerState {
    state: SessionState,
    /// Bumped on every new session and on close; a task holding a stale
    /// generation treats its completion as a no-op.
    generation: u64,
    watched: HashSet<PathBuf>,
    known_times: HashMap<PathBuf, u64>,
    pending: PendingBatch,
    scan_queue: ScanQueue,
    resolution: ResolutionEstimator,
    cursor: Option<String>,
    debounce: Option<JoinHandle<()>>,
    /// Bumped on every timer cancel or rearm; a sleeping timer that wakes
    /// with a stale epoch does not fire.
    timer_epoch: u64,
}

impl InnerState {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            watched: HashSet::new(),
            known_times: HashMap::new(),
            pending: PendingBatch::default(),
            scan_queue: ScanQueue::default(),
            resolution: ResolutionEstimator::new(),
            cursor: None,
            debounce: None,
            timer_epoch: 0,
        }
    }

    /// Reset session-scoped state for a fresh watch. The resolution
    /// estimate and the cursor survive across sessions of one instance.
    fn begin_session(&mut self, files: &[PathBuf], dirs: &[PathBuf]) -> u64 {
        self.cancel_debounce();
        self.generation += 1;
        self.state = SessionState::ScanningBaseline;
        self.watched = files.iter().chain(dirs.iter()).cloned().collect();
        self.known_times.clear();
        self.pending = PendingBatch::default();
        self.scan_queue = ScanQueue::default();
        self.generation
    }

    fn cancel_debounce(&mut self) {
        self.timer_epoch += 1;
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }
}

struct Shared {
    config: WatchConfiguration,
    events: broadcast::Sender<WatcherEvent>,
    inner: Mutex<InnerState>,
}

/// Debounced, deduplicated aggregation of file-change notifications.
///
/// Constructed with a [`WatchConfiguration`] and exclusive ownership of one
/// [`Transport`]. A session is started with [`watch`](Self::watch), which
/// runs the baseline scan and the subscription handshake concurrently and
/// resolves once both have finished. Consumers receive
/// [`WatcherEvent`]s through the broadcast stream returned by
/// [`subscribe_events`](Self::subscribe_events).
pub struct ChangeAggregator {
    shared: Arc<Shared>,
    adapter: Arc<Mutex<SubscriptionAdapter>>,
}

impl ChangeAggregator {
    /// Validate the configuration and take ownership of the transport.
    pub fn new(config: WatchConfiguration, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let adapter = SubscriptionAdapter::new(transport, config.root_path.clone());
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                events,
                inner: Mutex::new(InnerState::new()),
            }),
            adapter: Arc::new(Mutex::new(adapter)),
        })
    }

    /// Subscribe to the event stream. Every receiver sees every event
    /// emitted after the call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WatcherEvent> {
        self.shared.events.subscribe()
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Snapshot of the known modification times, as of the last processed
    /// event. No side effects.
    pub async fn snapshot(&self) -> HashMap<PathBuf, u64> {
        self.shared.inner.lock().await.known_times.clone()
    }

    /// Start watching `files` and `dirs` for changes since `since`.
    ///
    /// A no-op on a session that is already active or still scanning; a
    /// resume when the session is paused (missed events are not replayed,
    /// but nothing delivered after the call is dropped). Otherwise a new
    /// session: the baseline scan and the subscription handshake run
    /// concurrently, neither blocking the other, and the returned future
    /// resolves once both have completed. The first failure of either leg
    /// surfaces here and tears the session back down to idle.
    ///
    /// Session setup runs on a spawned task: a caller that drops this
    /// future does not cancel the session.
    pub async fn watch(&self, files: Vec<PathBuf>, dirs: Vec<PathBuf>, since: Since) -> Result<()> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Active | SessionState::ScanningBaseline => {
                    debug!("watch() called on a live session, nothing to do");
                    return Ok(());
                }
                SessionState::Paused => {
                    info!("resuming paused watch session");
                    inner.state = SessionState::Active;
                    return Ok(());
                }
                SessionState::Idle | SessionState::Closed => inner.begin_session(&files, &dirs),
            }
        };

        let mut paths = files;
        paths.extend(dirs);
        info!(paths = paths.len(), "starting watch session");

        let setup = tokio::spawn(Self::establish_session(
            Arc::clone(&self.shared),
            Arc::clone(&self.adapter),
            paths,
            since,
            generation,
        ));
        match setup.await {
            Ok(result) => result,
            Err(err) => Err(Error::Channel(format!("watch setup task failed: {err}"))),
        }
    }

    /// Stop reacting to events without tearing the subscription down.
    ///
    /// Cancels any in-flight debounce timer; notifications received while
    /// paused still advance the cursor but are otherwise dropped, not
    /// buffered. Only a fresh [`watch`](Self::watch) call resumes. Paths
    /// already accumulated in the pending batch are kept and show up in the
    /// first settle after resumption. Idempotent.
    pub async fn pause(&self) {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            SessionState::ScanningBaseline | SessionState::Active => {
                debug!("pausing watch session");
                inner.cancel_debounce();
                inner.state = SessionState::Paused;
            }
            SessionState::Paused | SessionState::Idle | SessionState::Closed => {}
        }
    }

    /// Tear the session down: cancel the debounce timer, invalidate
    /// in-flight scan and pump tasks, unsubscribe best-effort, and release
    /// the transport connection.
    ///
    /// Idempotent and safe to call before any `watch`. The debounce timer
    /// can no longer fire once this returns. A later `watch` starts a fresh
    /// session over a fresh connection and may resume from a cursor.
    pub async fn close(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state == SessionState::Closed {
                return Ok(());
            }
            debug!("closing watch session");
            inner.cancel_debounce();
            inner.generation += 1;
            inner.state = SessionState::Closed;
        }
        self.adapter.lock().await.shutdown().await;
        Ok(())
    }

    /// Run the subscription handshake and the baseline scan concurrently,
    /// then merge the scan into the known-time table and replay any events
    /// that raced it.
    async fn establish_session(
        shared: Arc<Shared>,
        adapter: Arc<Mutex<SubscriptionAdapter>>,
        paths: Vec<PathBuf>,
        since: Since,
        generation: u64,
    ) -> Result<()> {
        let subscribe = async {
            let mut adapter = adapter.lock().await;
            adapter.establish(&paths, &since).await
        };
        let (subscribed, scanned) = tokio::join!(
            subscribe,
            scan::baseline_scan(&paths, shared.config.scan_concurrency)
        );

        let (translator, batches) = match subscribed {
            Ok(established) => established,
            Err(err) => {
                warn!(%err, "subscription establishment failed, tearing the session down");
                let mut inner = shared.inner.lock().await;
                if inner.generation == generation && inner.state != SessionState::Closed {
                    inner.state = SessionState::Idle;
                }
                return Err(err);
            }
        };

        Self::spawn_pump(Arc::clone(&shared), translator, batches, generation);

        let mut inner = shared.inner.lock().await;
        if inner.generation != generation || inner.state == SessionState::Closed {
            debug!("baseline scan completed for a superseded session, discarding");
            return Ok(());
        }

        for (path, mtime_ms) in scanned {
            inner.resolution.observe(mtime_ms);
            let normalized = inner.resolution.normalize(mtime_ms);
            inner.known_times.insert(path, normalized);
        }

        if inner.state == SessionState::Paused {
            // Pause drops events, including the ones that raced the scan.
            let dropped = inner.scan_queue.drain();
            if !dropped.is_empty() {
                debug!(dropped = dropped.len(), "discarding events queued during a paused scan");
            }
            return Ok(());
        }

        inner.state = SessionState::Active;
        let queued = inner.scan_queue.drain();
        debug!(
            baseline = inner.known_times.len(),
            queued = queued.len(),
            "baseline scan complete"
        );
        for event in queued {
            Self::process_event(&shared, &mut inner, event);
        }
        Ok(())
    }

    /// Drain notification batches into the state machine until the
    /// transport drops the channel or the session is superseded.
    fn spawn_pump(
        shared: Arc<Shared>,
        translator: BatchTranslator,
        mut batches: mpsc::UnboundedReceiver<NotificationBatch>,
        generation: u64,
    ) {
        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let mut inner = shared.inner.lock().await;
                if inner.generation != generation || inner.state == SessionState::Closed {
                    break;
                }
                let Some((clock, events)) = translator.translate(batch) else {
                    continue;
                };
                // The cursor advances even while paused, so a later resume
                // from it does not replay the paused-over interval.
                inner.cursor = Some(clock);
                for event in events {
                    Self::process_event(&shared, &mut inner, event);
                }
            }
            trace!("notification pump finished");
        });
    }

    fn process_event(shared: &Arc<Shared>, inner: &mut InnerState, event: PathEvent) {
        if !inner.watched.contains(event.path()) {
            trace!(path = %event.path().display(), "notification for an unwatched path, ignoring");
            return;
        }
        match inner.state {
            SessionState::ScanningBaseline => inner.scan_queue.push(event),
            SessionState::Active => Self::apply_live(shared, inner, event),
            SessionState::Paused => {
                trace!(path = %event.path().display(), "paused, dropping event");
            }
            SessionState::Idle | SessionState::Closed => {}
        }
    }

    fn apply_live(shared: &Arc<Shared>, inner: &mut InnerState, event: PathEvent) {
        match event {
            PathEvent::Updated { path, mtime_ms } => {
                inner.resolution.observe(mtime_ms);
                let normalized = inner.resolution.normalize(mtime_ms);
                if inner.known_times.get(&path) == Some(&normalized) {
                    trace!(path = %path.display(), "modification time already known, ignoring");
                    return;
                }
                inner.known_times.insert(path.clone(), normalized);
                let _ = shared.events.send(WatcherEvent::Changed {
                    path: path.clone(),
                    mtime_ms,
                });
                inner.pending.note_change(path);
            }
            PathEvent::Removed { path } => {
                inner.known_times.remove(&path);
                let _ = shared
                    .events
                    .send(WatcherEvent::Removed { path: path.clone() });
                inner.pending.note_removal(path);
            }
        }
        Self::arm_debounce(shared, inner);
    }

    /// Cancel-then-reschedule: every live event pushes the settle point a
    /// full debounce interval into the future.
    fn arm_debounce(shared: &Arc<Shared>, inner: &mut InnerState) {
        inner.cancel_debounce();
        let epoch = inner.timer_epoch;
        let shared = Arc::clone(shared);
        inner.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            let mut inner = shared.inner.lock().await;
            if inner.timer_epoch != epoch || inner.state != SessionState::Active {
                return;
            }
            inner.debounce = None;
            let cursor = inner.cursor.clone();
            let batch = inner.pending.take(cursor);
            debug!(
                changes = batch.changes.len(),
                removals = batch.removals.len(),
                "debounce window settled"
            );
            let _ = shared.events.send(WatcherEvent::Aggregated(batch));
        }));
    }
}
