//! Transform Manager: the single owner of all coordination state.
//!
//! The manager runs as one tokio task and processes an ordered stream of
//! events. Because nothing else touches its state, admission, coalescing,
//! caching and dispatch need no locks.
//!
//! # Architecture
//!
//! ```text
//!   HTTP handlers                  manager task                    workers
//!  ┌────────────┐  try_send   ┌──────────────────────┐   Job   ┌──────────┐
//!  │ submit()   │────────────▶│ cache    (LRU, size) │────────▶│ worker 0 │
//!  │ stats()    │   inbox     │ pending  (fp → wait) │────────▶│ worker 1 │
//!  │ clear()    │             │ queue    (FIFO, Q)   │────────▶│   ...    │
//!  └────────────┘             │ free     (W slots)   │         └──────────┘
//!        ▲                    └──────────────────────┘              │
//!        │     oneshot per waiter      ▲                            │
//!        └─────────────────────────────┴────── Completion ──────────┘
//! ```
//!
//! # Per-request lifecycle
//!
//! 1. Cache hit: answered immediately.
//! 2. Pending hit: the waiter joins the existing entry (coalescing).
//! 3. New fingerprint: dispatched to a free worker, or queued if the
//!    admission queue has room, or rejected with `Overloaded`.
//!
//! When a worker completes, the result is cached (on success), every waiter
//! is answered in attachment order, the entry is removed, the worker slot is
//! released and the head of the queue is dispatched.
//!
//! Two periodic ticks keep long-running state bounded: a cache sweep drops
//! entries that have not been read for `cache_ttl`, and a pending check
//! prunes disconnected waiters and times out requests stuck in the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{OverloadReason, TransformError};
use crate::source::ImageSource;

use super::cache::{CachePut, SizedLruCache, Weighted, DEFAULT_CACHE_CAPACITY};
use super::fingerprint::Fingerprint;
use super::imaging::ImagingLibrary;
use super::request::{OutputFormat, TransformRequest};
use super::worker::{spawn_worker, Completion, Job, Worker, WorkerId};

/// Default admission queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default capacity of the inbound message channel.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables of the manager and its worker pool.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of workers (`W`), at least 1
    pub workers: usize,

    /// Admission queue capacity (`Q`)
    pub queue_capacity: usize,

    /// Result cache capacity in bytes
    pub cache_capacity: usize,

    /// Cache entries not read for this long are swept
    pub cache_ttl: Duration,

    /// How often the cache sweep runs
    pub sweep_interval: Duration,

    /// Longest time a request may wait in the admission queue
    pub max_queue_wait: Duration,

    /// How often waiters are checked for disconnects and timeouts
    pub pending_check_interval: Duration,

    /// Capacity of the inbound channel; a full channel rejects submissions
    pub inbox_capacity: usize,
}

/// Available cores minus two, at least 1.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            max_queue_wait: Duration::from_secs(20),
            pending_check_interval: Duration::from_secs(5),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    Cache,
    Transform,
}

impl ImageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageOrigin::Cache => "cache",
            ImageOrigin::Transform => "transform",
        }
    }
}

/// Time spent by the worker on a fresh transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformTimings {
    pub transform: Duration,
    pub encode: Duration,
}

/// A transformed image as delivered to a requester.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub data: Bytes,
    pub format: OutputFormat,
    pub fingerprint: Fingerprint,
    pub origin: ImageOrigin,

    /// Present only when the image was transformed for this request
    pub timings: Option<TransformTimings>,
}

type Reply = oneshot::Sender<Result<TransformOutput, TransformError>>;

/// Handle to a submitted transform.
///
/// Dropping the ticket tells the manager the requester went away; the
/// transform itself still runs and its result is still cached.
#[derive(Debug)]
pub struct TransformTicket {
    fingerprint: Fingerprint,
    rx: oneshot::Receiver<Result<TransformOutput, TransformError>>,
}

impl TransformTicket {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Result<TransformOutput, TransformError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TransformError::internal(
                "transform manager dropped the request",
            )),
        }
    }
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub cache_bytes: usize,
    pub cache_capacity: usize,
    pub cache_entries: usize,
    pub pending: usize,
    pub queued: usize,
    pub queue_capacity: usize,
    pub busy_workers: usize,
    pub workers: usize,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

// =============================================================================
// Manager Handle
// =============================================================================

enum Message {
    Submit {
        fingerprint: Fingerprint,
        request: Arc<TransformRequest>,
        reply: Reply,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
    ClearCache {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle used by request handlers to talk to the manager task.
///
/// The manager task stops once every handle has been dropped.
#[derive(Clone)]
pub struct TransformManager {
    inbox: mpsc::Sender<Message>,
}

impl TransformManager {
    /// Spawn the manager task and its worker pool on the current runtime.
    pub fn spawn(
        config: ManagerConfig,
        source: Arc<dyn ImageSource>,
        imaging: Arc<dyn ImagingLibrary>,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let (completion_tx, completion_rx) = mpsc::channel(worker_count);

        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&source), Arc::clone(&imaging));
                spawn_worker(worker, completion_tx.clone())
            })
            .collect();
        drop(completion_tx);

        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let sweep_interval = config.sweep_interval;
        let check_interval = config.pending_check_interval;
        let state = ManagerState::new(&config, workers);

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            cache_capacity = config.cache_capacity,
            "Transform manager started"
        );

        tokio::spawn(run(
            state,
            inbox_rx,
            completion_rx,
            sweep_interval,
            check_interval,
        ));

        Self { inbox: inbox_tx }
    }

    /// Submit a request. Never waits: when the manager cannot accept the
    /// message right now the ticket resolves to `Overloaded(Busy)`.
    pub fn submit(&self, request: TransformRequest) -> TransformTicket {
        let fingerprint = Fingerprint::of(&request);
        let (reply, rx) = oneshot::channel();
        let message = Message::Submit {
            fingerprint,
            request: Arc::new(request),
            reply,
        };

        if let Err(e) = self.inbox.try_send(message) {
            let (message, outcome) = match e {
                mpsc::error::TrySendError::Full(m) => {
                    (m, TransformError::overloaded(OverloadReason::Busy))
                }
                mpsc::error::TrySendError::Closed(m) => {
                    (m, TransformError::internal("transform manager is not running"))
                }
            };
            if let Message::Submit { reply, .. } = message {
                let _ = reply.send(Err(outcome));
            }
        }

        TransformTicket { fingerprint, rx }
    }

    /// Submit a request and wait for its outcome.
    pub async fn transform(
        &self,
        request: TransformRequest,
    ) -> Result<TransformOutput, TransformError> {
        self.submit(request).wait().await
    }

    pub async fn stats(&self) -> Result<ManagerStats, TransformError> {
        let (reply, rx) = oneshot::channel();
        self.request(Message::Stats { reply }, rx).await
    }

    /// Empty the result cache, returning the number of removed entries.
    pub async fn clear_cache(&self) -> Result<usize, TransformError> {
        let (reply, rx) = oneshot::channel();
        self.request(Message::ClearCache { reply }, rx).await
    }

    async fn request<T>(
        &self,
        message: Message,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TransformError> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| TransformError::internal("transform manager is not running"))?;
        rx.await
            .map_err(|_| TransformError::internal("transform manager dropped the request"))
    }
}

async fn run(
    mut state: ManagerState,
    mut inbox: mpsc::Receiver<Message>,
    mut completions: mpsc::Receiver<Completion>,
    sweep_interval: Duration,
    check_interval: Duration,
) {
    let start = tokio::time::Instant::now();
    let mut sweep = tokio::time::interval_at(start + sweep_interval, sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut check = tokio::time::interval_at(start + check_interval, check_interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Completions first: they free workers and shrink the pending table
            biased;

            Some(completion) = completions.recv() => state.handle_completion(completion),
            message = inbox.recv() => match message {
                Some(Message::Submit { fingerprint, request, reply }) => {
                    state.handle_submit(fingerprint, request, reply, Instant::now());
                }
                Some(Message::Stats { reply }) => {
                    let _ = reply.send(state.stats());
                }
                Some(Message::ClearCache { reply }) => {
                    let _ = reply.send(state.clear_cache());
                }
                None => break,
            },
            _ = sweep.tick() => {
                state.sweep_cache(Instant::now());
            }
            _ = check.tick() => {
                state.check_pending(Instant::now());
            }
        }
    }

    debug!("Transform manager stopped");
}

// =============================================================================
// Manager State
// =============================================================================

struct CacheEntry {
    data: Bytes,
    request: Arc<TransformRequest>,
}

impl Weighted for CacheEntry {
    fn weight(&self) -> usize {
        self.data.len()
    }
}

struct Waiter {
    reply: Reply,
    attached: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Queued,
    Dispatched(WorkerId),
}

struct PendingEntry {
    request: Arc<TransformRequest>,
    waiters: Vec<Waiter>,
    state: DispatchState,
}

/// Everything the manager owns. All handlers are synchronous, so the state
/// can be driven directly in tests with plain channels standing in for
/// workers.
struct ManagerState {
    cache: SizedLruCache<Fingerprint, CacheEntry>,
    pending: HashMap<Fingerprint, PendingEntry>,
    queue: VecDeque<Fingerprint>,
    queue_capacity: usize,
    workers: Vec<mpsc::Sender<Job>>,
    free_workers: VecDeque<WorkerId>,
    live_workers: usize,
    cache_ttl: Duration,
    max_queue_wait: Duration,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    cache_hits: u64,
    coalesced: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
}

impl ManagerState {
    fn new(config: &ManagerConfig, workers: Vec<mpsc::Sender<Job>>) -> Self {
        let free_workers = (0..workers.len()).collect();
        Self {
            cache: SizedLruCache::with_capacity(config.cache_capacity),
            pending: HashMap::new(),
            queue: VecDeque::with_capacity(config.queue_capacity),
            queue_capacity: config.queue_capacity,
            live_workers: workers.len(),
            workers,
            free_workers,
            cache_ttl: config.cache_ttl,
            max_queue_wait: config.max_queue_wait,
            counters: Counters::default(),
        }
    }

    fn handle_submit(
        &mut self,
        fingerprint: Fingerprint,
        request: Arc<TransformRequest>,
        reply: Reply,
        now: Instant,
    ) {
        if let Some(entry) = self.cache.peek(&fingerprint) {
            if *entry.request != *request {
                error!(fingerprint = %fingerprint, cached = %entry.request, incoming = %request, "Fingerprint collision in cache");
                let _ = reply.send(Err(TransformError::internal("fingerprint collision")));
                return;
            }
            if let Some(entry) = self.cache.get(&fingerprint) {
                self.counters.cache_hits += 1;
                debug!(fingerprint = %fingerprint, "Cache hit");
                let _ = reply.send(Ok(TransformOutput {
                    data: entry.data.clone(),
                    format: request.format,
                    fingerprint,
                    origin: ImageOrigin::Cache,
                    timings: None,
                }));
            }
            return;
        }

        if let Some(entry) = self.pending.get_mut(&fingerprint) {
            if *entry.request != *request {
                error!(fingerprint = %fingerprint, pending = %entry.request, incoming = %request, "Fingerprint collision in pending table");
                let _ = reply.send(Err(TransformError::internal("fingerprint collision")));
                return;
            }
            self.counters.coalesced += 1;
            debug!(fingerprint = %fingerprint, waiters = entry.waiters.len() + 1, "Coalesced with in-flight transform");
            entry.waiters.push(Waiter {
                reply,
                attached: now,
            });
            return;
        }

        let state = if let Some(worker) = self.free_workers.pop_front() {
            DispatchState::Dispatched(worker)
        } else if self.queue.len() < self.queue_capacity {
            DispatchState::Queued
        } else {
            self.counters.rejected += 1;
            warn!(fingerprint = %fingerprint, queued = self.queue.len(), "Admission queue full, rejecting");
            let _ = reply.send(Err(TransformError::overloaded(OverloadReason::QueueFull)));
            return;
        };

        self.pending.insert(
            fingerprint,
            PendingEntry {
                request: Arc::clone(&request),
                waiters: vec![Waiter {
                    reply,
                    attached: now,
                }],
                state,
            },
        );

        match state {
            DispatchState::Dispatched(worker) => self.dispatch(worker, fingerprint, request),
            DispatchState::Queued => {
                debug!(fingerprint = %fingerprint, position = self.queue.len(), "Queued");
                self.queue.push_back(fingerprint);
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            worker,
            fingerprint,
            outcome,
        } = completion;

        self.release_worker(worker);

        match self.pending.remove(&fingerprint) {
            Some(entry) => {
                if entry.state != DispatchState::Dispatched(worker) {
                    warn!(fingerprint = %fingerprint, worker, state = ?entry.state, "Completion from unexpected worker");
                }

                match outcome {
                    Ok(image) => {
                        self.counters.completed += 1;
                        debug!(
                            fingerprint = %fingerprint,
                            worker,
                            bytes = image.data.len(),
                            waiters = entry.waiters.len(),
                            "Transform completed"
                        );

                        let cached = CacheEntry {
                            data: image.data.clone(),
                            request: Arc::clone(&entry.request),
                        };
                        match self.cache.put(fingerprint, cached) {
                            CachePut::Stored { evicted } if !evicted.is_empty() => {
                                debug!(count = evicted.len(), "Evicted cache entries");
                            }
                            CachePut::Stored { .. } => {}
                            CachePut::TooLarge => {
                                warn!(fingerprint = %fingerprint, bytes = image.data.len(), "Result larger than cache capacity, not cached");
                            }
                        }

                        let output = TransformOutput {
                            data: image.data,
                            format: entry.request.format,
                            fingerprint,
                            origin: ImageOrigin::Transform,
                            timings: Some(TransformTimings {
                                transform: image.transform_time,
                                encode: image.encode_time,
                            }),
                        };
                        for waiter in entry.waiters {
                            let _ = waiter.reply.send(Ok(output.clone()));
                        }
                    }
                    Err(err) => {
                        self.counters.failed += 1;
                        for waiter in entry.waiters {
                            let _ = waiter.reply.send(Err(err.clone()));
                        }
                    }
                }
            }
            None => {
                warn!(fingerprint = %fingerprint, worker, "Completion without pending entry");
            }
        }

        self.dispatch_queued();
    }

    fn release_worker(&mut self, worker: WorkerId) {
        if worker < self.workers.len() && !self.free_workers.contains(&worker) {
            self.free_workers.push_back(worker);
        }
    }

    /// Hand queued entries to free workers in FIFO order.
    fn dispatch_queued(&mut self) {
        while !self.free_workers.is_empty() {
            let Some(fingerprint) = self.queue.pop_front() else {
                break;
            };
            let Some(worker) = self.free_workers.pop_front() else {
                break;
            };
            let Some(entry) = self.pending.get_mut(&fingerprint) else {
                self.free_workers.push_front(worker);
                continue;
            };
            entry.state = DispatchState::Dispatched(worker);
            let request = Arc::clone(&entry.request);
            self.dispatch(worker, fingerprint, request);
        }
    }

    fn dispatch(&mut self, worker: WorkerId, fingerprint: Fingerprint, request: Arc<TransformRequest>) {
        debug!(fingerprint = %fingerprint, worker, "Dispatching");
        let job = Job {
            fingerprint,
            request,
        };
        if let Err(e) = self.workers[worker].try_send(job) {
            // An idle worker always has room, so the task must be gone
            error!(worker, error = %e, "Worker unavailable, retiring it");
            self.live_workers = self.live_workers.saturating_sub(1);
            if let Some(entry) = self.pending.remove(&fingerprint) {
                self.counters.failed += 1;
                let err = TransformError::internal(format!("worker {} is unavailable", worker));
                for waiter in entry.waiters {
                    let _ = waiter.reply.send(Err(err.clone()));
                }
            }
        }
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            cache_bytes: self.cache.current_size(),
            cache_capacity: self.cache.capacity(),
            cache_entries: self.cache.len(),
            pending: self.pending.len(),
            queued: self.queue.len(),
            queue_capacity: self.queue_capacity,
            busy_workers: self.live_workers.saturating_sub(self.free_workers.len()),
            workers: self.live_workers,
            cache_hits: self.counters.cache_hits,
            coalesced: self.counters.coalesced,
            completed: self.counters.completed,
            failed: self.counters.failed,
            rejected: self.counters.rejected,
        }
    }

    fn clear_cache(&mut self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "Cache cleared");
        removed
    }

    fn sweep_cache(&mut self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.cache_ttl) else {
            return 0;
        };
        let removed = self.cache.purge_older_than(cutoff);
        if removed > 0 {
            info!(removed, remaining = self.cache.len(), "Swept stale cache entries");
        }
        removed
    }

    /// Drop disconnected waiters and time out waiters stuck in the queue.
    fn check_pending(&mut self, now: Instant) {
        let max_wait = self.max_queue_wait;
        let mut abandoned = Vec::new();

        for (fingerprint, entry) in self.pending.iter_mut() {
            entry.waiters.retain(|w| !w.reply.is_closed());

            if entry.state != DispatchState::Queued {
                continue;
            }

            let before = entry.waiters.len();
            let (expired, waiting): (Vec<_>, Vec<_>) = entry
                .waiters
                .drain(..)
                .partition(|w| now.saturating_duration_since(w.attached) >= max_wait);
            entry.waiters = waiting;

            if !expired.is_empty() {
                warn!(fingerprint = %fingerprint, expired = expired.len(), of = before, "Queued requests timed out");
                self.counters.rejected += expired.len() as u64;
                for waiter in expired {
                    let _ = waiter
                        .reply
                        .send(Err(TransformError::overloaded(OverloadReason::QueueTimeout)));
                }
                if entry.waiters.is_empty() {
                    abandoned.push(*fingerprint);
                }
            }
        }

        for fingerprint in abandoned {
            self.pending.remove(&fingerprint);
            self.queue.retain(|fp| *fp != fingerprint);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
