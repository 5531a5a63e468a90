//! Bounded-concurrency generation scheduler.
//!
//! Submissions go into a priority queue (higher priority first, FIFO within a
//! priority). A semaphore with `max_concurrent` permits gates admission;
//! whenever a permit frees up the next queued task is started. Identical
//! in-flight requests, keyed by `(template, output_path)`, share one result.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all, BoxFuture, Shared};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use stencil_core::{ErrorKind, GenerationError, TemplateName};

use crate::config::EngineConfig;
use crate::lock;
use crate::request::{GenerationRequest, GenerationResult};

/// Runs one admitted request to completion.
#[async_trait]
pub trait GenerationRunner: Send + Sync + 'static {
    async fn run(&self, request: GenerationRequest) -> GenerationResult;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub task_timeout: Duration,
}

impl From<&EngineConfig> for SchedulerSettings {
    fn from(config: &EngineConfig) -> Self {
        SchedulerSettings {
            max_concurrent: config.max_concurrent_generations.max(1),
            task_timeout: config.task_timeout(),
        }
    }
}

type TaskKey = (TemplateName, PathBuf);
type SharedResult = Shared<BoxFuture<'static, GenerationResult>>;

/// A submitted request waiting for a permit.
struct GenerationTask {
    id: u64,
    request: GenerationRequest,
    submitted_at: Instant,
    respond_to: oneshot::Sender<GenerationResult>,
}

struct Queued {
    priority: i32,
    seq: u64,
    task: GenerationTask,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then the earlier submission.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    queue: BinaryHeap<Queued>,
    inflight: HashMap<TaskKey, (u64, SharedResult)>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    running: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub max_concurrent: usize,
    pub running: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub deduplicated: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

/// Resolves to the request's [`GenerationResult`].
///
/// Handles of deduplicated submissions resolve to the same result.
pub struct GenerationHandle {
    id: u64,
    result: SharedResult,
}

impl GenerationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for GenerationHandle {
    type Output = GenerationResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().result).poll(cx)
    }
}

struct Inner {
    runner: Arc<dyn GenerationRunner>,
    settings: SchedulerSettings,
    semaphore: Arc<Semaphore>,
    state: Mutex<State>,
    counters: Counters,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct AsyncGenerationManager {
    inner: Arc<Inner>,
}

impl AsyncGenerationManager {
    pub fn new(runner: Arc<dyn GenerationRunner>, settings: SchedulerSettings) -> Self {
        let settings = SchedulerSettings {
            max_concurrent: settings.max_concurrent.max(1),
            ..settings
        };
        AsyncGenerationManager {
            inner: Arc::new(Inner {
                runner,
                settings,
                semaphore: Arc::new(Semaphore::new(settings.max_concurrent)),
                state: Mutex::new(State::default()),
                counters: Counters::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.inner.settings
    }

    /// Queue `request` and start it as soon as a permit is free.
    ///
    /// Must be called within a Tokio runtime.
    pub fn submit(&self, request: GenerationRequest) -> GenerationHandle {
        let inner = &self.inner;
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let key = request.key();

        let handle = {
            let mut state = lock(&inner.state);
            if let Some((id, shared)) = state.inflight.get(&key) {
                inner.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(task = id, template = %key.0, "joined in-flight generation");
                return GenerationHandle {
                    id: *id,
                    result: shared.clone(),
                };
            }

            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            let (template, output) = key.clone();
            let result: SharedResult = async move {
                rx.await.unwrap_or_else(|_| {
                    GenerationResult::failed(
                        template,
                        output,
                        ErrorKind::Unknown,
                        "generation task ended without a result",
                        Duration::ZERO,
                    )
                })
            }
            .boxed()
            .shared();

            state.inflight.insert(key, (id, result.clone()));
            let priority = request.priority;
            state.queue.push(Queued {
                priority,
                seq: id,
                task: GenerationTask {
                    id,
                    request,
                    submitted_at: Instant::now(),
                    respond_to: tx,
                },
            });
            debug!(task = id, priority, queued = state.queue.len(), "generation queued");
            GenerationHandle { id, result }
        };

        Inner::dispatch(inner);
        handle
    }

    /// Submit every request and wait for all of them.
    ///
    /// With `allow_partial_failure` every result is returned in submission
    /// order. Otherwise the first failure is returned as an error; the other
    /// tasks keep running.
    pub async fn submit_batch(
        &self,
        requests: Vec<GenerationRequest>,
        allow_partial_failure: bool,
    ) -> Result<Vec<GenerationResult>, GenerationError> {
        let handles: Vec<GenerationHandle> = requests.into_iter().map(|r| self.submit(r)).collect();
        if allow_partial_failure {
            Ok(join_all(handles).await)
        } else {
            try_join_all(handles.into_iter().map(|h| async move { h.await.into_result() })).await
        }
    }

    /// Results in completion order, with at most `max_concurrency` (default:
    /// the scheduler's cap) submitted at a time.
    pub fn stream(
        &self,
        requests: Vec<GenerationRequest>,
        max_concurrency: Option<usize>,
    ) -> BoxStream<'static, GenerationResult> {
        let width = max_concurrency
            .unwrap_or(self.inner.settings.max_concurrent)
            .max(1);
        let manager = self.clone();
        stream::iter(requests)
            .map(move |request| manager.submit(request))
            .buffer_unordered(width)
            .boxed()
    }

    /// Resolve every queued, not yet started task as cancelled. Running tasks
    /// are unaffected. Returns how many were cancelled.
    pub fn cancel_pending(&self) -> usize {
        let drained: Vec<GenerationTask> = {
            let mut state = lock(&self.inner.state);
            let drained: Vec<GenerationTask> = state.queue.drain().map(|q| q.task).collect();
            for task in &drained {
                state.inflight.remove(&task.request.key());
            }
            drained
        };

        let count = drained.len();
        for task in drained {
            let request = task.request;
            let _ = task.respond_to.send(GenerationResult::failed(
                request.template,
                request.output_path,
                ErrorKind::Unknown,
                "cancelled before it started",
                Duration::ZERO,
            ));
        }
        self.inner
            .counters
            .cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            info!(count, "cancelled pending generations");
        }
        count
    }

    pub fn stats(&self) -> SchedulerStats {
        let (queued, in_flight) = {
            let state = lock(&self.inner.state);
            (state.queue.len(), state.inflight.len())
        };
        let c = &self.inner.counters;
        SchedulerStats {
            max_concurrent: self.inner.settings.max_concurrent,
            running: c.running.load(Ordering::Relaxed),
            queued,
            in_flight,
            submitted: c.submitted.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    /// Start queued tasks while permits are available.
    fn dispatch(inner: &Arc<Inner>) {
        loop {
            let Ok(permit) = Arc::clone(&inner.semaphore).try_acquire_owned() else {
                return;
            };
            let Some(queued) = lock(&inner.state).queue.pop() else {
                return;
            };
            inner.counters.running.fetch_add(1, Ordering::Relaxed);
            let this = Arc::clone(inner);
            tokio::spawn(async move { this.execute(queued.task, permit).await });
        }
    }

    async fn execute(self: Arc<Self>, task: GenerationTask, permit: OwnedSemaphorePermit) {
        let GenerationTask {
            id,
            request,
            submitted_at,
            respond_to,
        } = task;
        let key = request.key();
        let started = Instant::now();
        debug!(
            task = id,
            template = %key.0,
            waited_ms = started.duration_since(submitted_at).as_millis() as u64,
            "generation started"
        );

        let runner = Arc::clone(&self.runner);
        let mut work = tokio::spawn(async move { runner.run(request).await });
        let result = match tokio::time::timeout(self.settings.task_timeout, &mut work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => GenerationResult::failed(
                key.0.clone(),
                key.1.clone(),
                ErrorKind::Unknown,
                format!("generation task failed: {join_err}"),
                started.elapsed(),
            ),
            Err(_) => {
                work.abort();
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(task = id, template = %key.0, "generation timed out");
                GenerationResult::failed(
                    key.0.clone(),
                    key.1.clone(),
                    ErrorKind::BackendFailure,
                    format!(
                        "generation timed out after {}s",
                        self.settings.task_timeout.as_secs()
                    ),
                    started.elapsed(),
                )
            }
        };

        if result.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut state = lock(&self.state);
            if state.inflight.get(&key).is_some_and(|(owner, _)| *owner == id) {
                state.inflight.remove(&key);
            }
        }
        self.counters.running.fetch_sub(1, Ordering::Relaxed);
        drop(permit);
        let _ = respond_to.send(result);
        Inner::dispatch(&self);
    }
}
