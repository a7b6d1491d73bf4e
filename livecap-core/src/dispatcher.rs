//! Shared-engine dispatcher.
//!
//! When several stream transcribers share one expensive ASR model, this
//! dispatcher centralizes access: requests enter a bounded priority queue
//! and a single worker serves them in `(priority asc, submission counter
//! asc)` order, so equal priorities are strictly FIFO and payloads are
//! never compared. The model loads on a background thread; requests
//! submitted before readiness queue up and run once the load completes.
//!
//! A failing request is logged and surfaced on its completion channel; the
//! worker keeps running. A failed model load marks the dispatcher
//! permanently failed and every subsequent submission errors immediately.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::engine::{EngineCache, EngineHandle, Transcriber};
use crate::error::{LivecapError, Result};

/// Default queue capacity.
const QUEUE_CAPACITY: usize = 128;

/// A unit of work for the dispatcher.
pub struct TranscriptionRequest {
    pub source_id: String,
    pub audio: Vec<f32>,
    pub sample_rate: u32,
    pub enqueue_time: Instant,
    pub priority: i32,
    pub is_final: bool,
    done: Sender<Result<DispatchResult>>,
}

/// What the engine produced for one request.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub text: String,
    pub confidence: f32,
    pub source_id: String,
    pub is_final: bool,
    /// Engine time for this request.
    pub processing_time: Duration,
}

/// Completion handle for a submitted request.
pub struct PendingTranscription {
    rx: Receiver<Result<DispatchResult>>,
}

impl PendingTranscription {
    /// Block until the request completes; `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<Result<DispatchResult>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll.
    pub fn try_wait(&self) -> Option<Result<DispatchResult>> {
        self.rx.try_recv().ok()
    }
}

enum Command {
    Request(TranscriptionRequest),
    Shutdown,
}

/// Heap entry ordered by `(priority, seq)`; the payload never takes part
/// in the comparison.
struct QueueEntry {
    priority: i32,
    seq: u64,
    command: Command,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Default)]
struct StatsInner {
    total_requests: u64,
    successful: u64,
    failed: u64,
    total_processing: Duration,
    per_source: HashMap<String, SourceStats>,
    cache_hits: u64,
    cache_misses: u64,
}

/// Per-source request accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub count: u64,
    pub total_ms: f64,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub average_processing_ms: f64,
    pub queue_depth: usize,
    pub model_loaded: bool,
    pub model_failed: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub per_source: HashMap<String, SourceStats>,
}

struct Shared {
    queue: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    queue_cv: Condvar,
    engine: Mutex<Option<EngineHandle>>,
    load_state: Mutex<LoadState>,
    load_cv: Condvar,
    stats: Mutex<StatsInner>,
}

type EngineLoader = Box<dyn FnOnce() -> Result<Box<dyn Transcriber>> + Send>;

/// Funnels requests from multiple sources through one engine.
pub struct SharedEngineDispatcher {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    counter: AtomicU64,
    capacity: usize,
    loader: Mutex<Option<EngineLoader>>,
    cache: Option<(Arc<EngineCache>, String)>,
    source_priorities: Mutex<HashMap<String, i32>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    model_loader_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SharedEngineDispatcher {
    /// Create a dispatcher that will build its engine with `loader` when
    /// [`start`](Self::start) runs.
    pub fn new(loader: impl FnOnce() -> Result<Box<dyn Transcriber>> + Send + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(BinaryHeap::new()),
                queue_cv: Condvar::new(),
                engine: Mutex::new(None),
                load_state: Mutex::new(LoadState::Loading),
                load_cv: Condvar::new(),
                stats: Mutex::new(StatsInner::default()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            counter: AtomicU64::new(0),
            capacity: QUEUE_CAPACITY,
            loader: Mutex::new(Some(Box::new(loader))),
            cache: None,
            source_priorities: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
            model_loader_thread: Mutex::new(None),
        }
    }

    /// Create a dispatcher for a registered engine id.
    pub fn for_engine(engine_id: &str) -> Self {
        let engine_id = engine_id.to_string();
        Self::new(move || crate::engine::create_engine(&engine_id))
    }

    /// Consult `cache` under `key` before loading, and store the engine
    /// there after a fresh load.
    pub fn with_cache(mut self, cache: Arc<EngineCache>, key: impl Into<String>) -> Self {
        self.cache = Some((cache, key.into()));
        self
    }

    /// Override the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Begin the model load and start the worker. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(loader) = self.loader.lock().take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(LivecapError::Config("dispatcher cannot be restarted".into()));
        };

        *self.shared.load_state.lock() = LoadState::Loading;

        // Model load on its own thread: requests queue while it runs.
        let shared = Arc::clone(&self.shared);
        let cache = self.cache.clone();
        let loader_thread = std::thread::Builder::new()
            .name("livecap-model-loader".into())
            .spawn(move || load_model(shared, cache, loader))
            .map_err(|e| LivecapError::Other(anyhow::anyhow!("loader thread spawn: {e}")))?;
        *self.model_loader_thread.lock() = Some(loader_thread);

        let shared = Arc::clone(&self.shared);
        let worker = std::thread::Builder::new()
            .name("livecap-dispatcher".into())
            .spawn(move || worker_loop(shared))
            .map_err(|e| LivecapError::Other(anyhow::anyhow!("worker thread spawn: {e}")))?;
        *self.worker.lock() = Some(worker);

        info!("shared engine dispatcher started");
        Ok(())
    }

    /// Enqueue one transcription request.
    ///
    /// `priority`: lower runs earlier; a per-source override set through
    /// [`set_priority`](Self::set_priority) wins over this argument.
    pub fn submit(
        &self,
        source_id: &str,
        audio: Vec<f32>,
        sample_rate: u32,
        priority: i32,
        is_final: bool,
    ) -> Result<PendingTranscription> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(LivecapError::DispatcherShutdown);
        }
        if let LoadState::Failed(message) = &*self.shared.load_state.lock() {
            return Err(LivecapError::Engine(format!("model load failed: {message}")));
        }

        let priority = self
            .source_priorities
            .lock()
            .get(source_id)
            .copied()
            .unwrap_or(priority);

        let (done, rx) = bounded(1);
        let request = TranscriptionRequest {
            source_id: source_id.to_string(),
            audio,
            sample_rate,
            enqueue_time: Instant::now(),
            priority,
            is_final,
            done,
        };

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.capacity {
                return Err(LivecapError::QueueFull);
            }
            let seq = self.counter.fetch_add(1, Ordering::SeqCst);
            queue.push(Reverse(QueueEntry {
                priority,
                seq,
                command: Command::Request(request),
            }));
        }
        self.shared.queue_cv.notify_one();

        Ok(PendingTranscription { rx })
    }

    /// Fix the priority used for every request from `source_id`,
    /// regardless of the per-call argument. Clamped at ≥ 0.
    pub fn set_priority(&self, source_id: &str, priority: i32) {
        let priority = priority.max(0);
        debug!(source_id, priority, "source priority set");
        self.source_priorities
            .lock()
            .insert(source_id.to_string(), priority);
    }

    /// Block until the model load finishes, up to `timeout`. Returns
    /// whether the engine is ready.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.load_state.lock();
        while *state == LoadState::Loading {
            if self
                .shared
                .load_cv
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        *state == LoadState::Ready
    }

    /// Stop the worker and clean the engine up.
    ///
    /// Requests still queued complete with [`LivecapError::DispatcherShutdown`];
    /// submissions after this call fail immediately.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping shared engine dispatcher");

        // Sentinel outranks every request, so the worker sees it next.
        {
            let mut queue = self.shared.queue.lock();
            let seq = self.counter.fetch_add(1, Ordering::SeqCst);
            queue.push(Reverse(QueueEntry {
                priority: i32::MIN,
                seq,
                command: Command::Shutdown,
            }));
        }
        self.shared.queue_cv.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.model_loader_thread.lock().take() {
            let _ = handle.join();
        }

        if let Some(engine) = self.shared.engine.lock().take() {
            engine.0.lock().cleanup();
        }
        info!("shared engine dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatcherStats {
        let stats = self.shared.stats.lock();
        let load_state = self.shared.load_state.lock().clone();
        let average_processing_ms = if stats.successful > 0 {
            stats.total_processing.as_secs_f64() * 1000.0 / stats.successful as f64
        } else {
            0.0
        };
        DispatcherStats {
            total_requests: stats.total_requests,
            successful: stats.successful,
            failed: stats.failed,
            average_processing_ms,
            queue_depth: self.shared.queue.lock().len(),
            model_loaded: load_state == LoadState::Ready,
            model_failed: matches!(load_state, LoadState::Failed(_)),
            cache_hits: stats.cache_hits,
            cache_misses: stats.cache_misses,
            per_source: stats.per_source.clone(),
        }
    }
}

impl Drop for SharedEngineDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn load_model(
    shared: Arc<Shared>,
    cache: Option<(Arc<EngineCache>, String)>,
    loader: EngineLoader,
) {
    let from_cache = cache
        .as_ref()
        .and_then(|(cache, key)| cache.get(key).map(|handle| (handle, key.clone())));

    let handle = match from_cache {
        Some((handle, key)) => {
            info!(key = key.as_str(), "engine served from memory cache");
            shared.stats.lock().cache_hits += 1;
            handle
        }
        None => {
            if cache.is_some() {
                shared.stats.lock().cache_misses += 1;
            }
            match loader() {
                Ok(engine) => {
                    let handle = EngineHandle::from_boxed(engine);
                    if let Some((cache, key)) = &cache {
                        cache.insert(key, &handle, false);
                    }
                    handle
                }
                Err(e) => {
                    error!(error = %e, "model load failed");
                    *shared.load_state.lock() = LoadState::Failed(e.to_string());
                    shared.load_cv.notify_all();
                    // Wake the worker so it can fail pending requests.
                    shared.queue_cv.notify_all();
                    return;
                }
            }
        }
    };

    info!(engine = handle.engine_name().as_str(), "engine ready");
    *shared.engine.lock() = Some(handle);
    *shared.load_state.lock() = LoadState::Ready;
    shared.load_cv.notify_all();
    shared.queue_cv.notify_all();
}

fn worker_loop(shared: Arc<Shared>) {
    // Serve nothing until the model settles one way or the other.
    {
        let mut state = shared.load_state.lock();
        while *state == LoadState::Loading {
            shared.load_cv.wait(&mut state);
        }
        if let LoadState::Failed(message) = &*state {
            let message = message.clone();
            drop(state);
            fail_pending(&shared, &message);
            return;
        }
    }
    info!("dispatcher worker serving");

    loop {
        let entry = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(Reverse(entry)) = queue.pop() {
                    break entry;
                }
                shared.queue_cv.wait(&mut queue);
            }
        };

        match entry.command {
            Command::Shutdown => {
                drain_on_shutdown(&shared);
                break;
            }
            Command::Request(request) => {
                shared.stats.lock().total_requests += 1;
                let started = Instant::now();
                let outcome = process_request(&shared, &request);
                let elapsed = started.elapsed();

                let mut stats = shared.stats.lock();
                match &outcome {
                    Ok(_) => {
                        stats.successful += 1;
                        stats.total_processing += elapsed;
                        let entry = stats
                            .per_source
                            .entry(request.source_id.clone())
                            .or_default();
                        entry.count += 1;
                        entry.total_ms += elapsed.as_secs_f64() * 1000.0;
                    }
                    Err(e) => {
                        warn!(
                            source_id = request.source_id.as_str(),
                            error = %e,
                            "transcription request failed"
                        );
                        stats.failed += 1;
                    }
                }
                drop(stats);

                // Receiver may have given up; that is not an error.
                let _ = request.done.send(outcome);
            }
        }
    }

    info!("dispatcher worker exited");
}

fn process_request(shared: &Shared, request: &TranscriptionRequest) -> Result<DispatchResult> {
    let engine_guard = shared.engine.lock();
    let engine = engine_guard
        .as_ref()
        .ok_or_else(|| LivecapError::Engine("engine not available".into()))?;

    let started = Instant::now();
    let (text, confidence) = engine
        .0
        .lock()
        .transcribe(&request.audio, request.sample_rate)?;

    debug!(
        source_id = request.source_id.as_str(),
        queued_ms = request.enqueue_time.elapsed().as_millis() as u64,
        "request served"
    );

    Ok(DispatchResult {
        text,
        confidence,
        source_id: request.source_id.clone(),
        is_final: request.is_final,
        processing_time: started.elapsed(),
    })
}

/// Complete everything still queued with `DispatcherShutdown`.
fn drain_on_shutdown(shared: &Shared) {
    let drained: Vec<QueueEntry> = {
        let mut queue = shared.queue.lock();
        std::mem::take(&mut *queue)
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(entry)| entry)
            .collect()
    };
    let mut failed = 0u64;
    for entry in drained {
        if let Command::Request(request) = entry.command {
            failed += 1;
            let _ = request.done.send(Err(LivecapError::DispatcherShutdown));
        }
    }
    if failed > 0 {
        warn!(failed, "pending requests failed by shutdown");
        shared.stats.lock().failed += failed;
    }
}

/// Complete everything queued (and everything that arrives never) after a
/// load failure.
fn fail_pending(shared: &Shared, message: &str) {
    let drained: Vec<QueueEntry> = {
        let mut queue = shared.queue.lock();
        std::mem::take(&mut *queue)
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(entry)| entry)
            .collect()
    };
    for entry in drained {
        if let Command::Request(request) = entry.command {
            shared.stats.lock().failed += 1;
            let _ = request
                .done
                .send(Err(LivecapError::Engine(format!("model load failed: {message}"))));
        }
    }
    error!(message, "dispatcher permanently failed");
}
