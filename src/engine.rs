//! The job registry: creation, submission, status, cancellation and shutdown.
//!
//! ```no_run
//! use batchrun::{handler_fn, Engine, EngineConfig, ItemContext, JobOptions, Priority};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     handler_fn(|_ctx: ItemContext, url: String| async move { anyhow::Ok(url.len()) }),
//! )?;
//!
//! let job = engine.create_job(
//!     vec!["https://a.example".into(), "https://b.example".into()],
//!     JobOptions::new()
//!         .name("lengths")
//!         .priority_of(|url: &String| if url.contains("a.") { Priority::High } else { Priority::Normal }),
//! )?;
//! let finished = engine.submit(job)?.wait().await?;
//! assert_eq!(finished.successful_items, 2);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::batch::{Item, ItemOutcome, ItemStatus, Job, JobOptions, JobStatus, Observer, Priority, Progress};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ItemExecutor, JobContext, panic_message};
use crate::handler::Handler;
use crate::rate_limit::RateLimiter;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::scheduler::JobScheduler;

/// Cumulative and live engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    /// Jobs registered and not yet settled.
    pub active_jobs: usize,
    /// Active jobs that are running and have not been asked to cancel.
    pub running_jobs: usize,
}

// Lives for the engine's lifetime; never reset when jobs are evicted.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
}

impl Counters {
    pub(crate) fn record_item(&self, status: ItemStatus) {
        match status {
            ItemStatus::Completed => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.successful.fetch_add(1, Ordering::Relaxed);
            }
            ItemStatus::Failed => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ItemStatus::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            ItemStatus::Pending | ItemStatus::Running => {}
        }
    }

    fn record_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_job(&self, status: JobStatus) {
        let counter = match status {
            JobStatus::Completed => &self.jobs_completed,
            JobStatus::Failed => &self.jobs_failed,
            JobStatus::Cancelled => &self.jobs_cancelled,
            JobStatus::Pending | JobStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStatistics {
        EngineStatistics {
            total_processed: self.processed.load(Ordering::Relaxed),
            total_successful: self.successful.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            active_jobs: 0,
            running_jobs: 0,
        }
    }
}

/// Returned by [`Engine::submit`]; delivers the final job snapshot.
#[derive(Debug)]
pub struct JobHandle<I, O> {
    id: Uuid,
    progress: watch::Receiver<Progress>,
    done: oneshot::Receiver<Job<I, O>>,
}

impl<I, O> JobHandle<I, O> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receiver that sees a new [`Progress`] whenever an item settles.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    pub fn latest(&self) -> Progress {
        self.progress.borrow().clone()
    }

    /// Waits for the job to reach a terminal status.
    pub async fn wait(self) -> Result<Job<I, O>> {
        let id = self.id;
        self.done.await.map_err(|_| EngineError::JobAborted(id))
    }
}

type Registry<H> = RwLock<HashMap<Uuid, Arc<JobContext<<H as Handler>::Input, <H as Handler>::Output>>>>;

struct Inner<H: Handler> {
    config: EngineConfig,
    handler: Arc<H>,
    limiter: Arc<RateLimiter>,
    retry: Arc<dyn RetryPolicy>,
    jobs: Registry<H>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Builds an [`Engine`] with a custom retry policy or rate limiter.
pub struct EngineBuilder<H> {
    config: EngineConfig,
    handler: H,
    limiter: Option<RateLimiter>,
    retry: Option<Arc<dyn RetryPolicy>>,
}

impl<H: Handler> EngineBuilder<H> {
    pub fn retry_policy(mut self, policy: impl RetryPolicy) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Result<Engine<H>> {
        self.config.validate()?;
        let limiter = self
            .limiter
            .unwrap_or_else(|| RateLimiter::from_config(&self.config));
        let retry = self
            .retry
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::from_config(&self.config)));

        Ok(Engine {
            inner: Arc::new(Inner {
                config: self.config,
                handler: Arc::new(self.handler),
                limiter: Arc::new(limiter),
                retry,
                jobs: RwLock::new(HashMap::new()),
                counters: Arc::new(Counters::default()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }
}

/// In-process batch engine. Cheap to clone; clones share all state.
pub struct Engine<H: Handler> {
    inner: Arc<Inner<H>>,
}

impl<H: Handler> Clone for Engine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Handler> Engine<H> {
    pub fn new(config: EngineConfig, handler: H) -> Result<Self> {
        Self::builder(config, handler).build()
    }

    pub fn builder(config: EngineConfig, handler: H) -> EngineBuilder<H> {
        EngineBuilder {
            config,
            handler,
            limiter: None,
            retry: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Validates `inputs` and wraps them into a pending job, sorted by priority.
    pub fn create_job(
        &self,
        inputs: Vec<H::Input>,
        options: JobOptions<H::Input, H::Output>,
    ) -> Result<Job<H::Input, H::Output>> {
        let config = &self.inner.config;
        if inputs.is_empty() {
            return Err(EngineError::Validation(
                "job must contain at least one item".into(),
            ));
        }
        if inputs.len() > config.max_items_per_batch {
            return Err(EngineError::Validation(format!(
                "job has {} items, the limit is {}",
                inputs.len(),
                config.max_items_per_batch
            )));
        }
        let max_attempts = options.max_attempts.unwrap_or(config.max_attempts);
        if max_attempts == 0 {
            return Err(EngineError::Validation(
                "max_attempts must be at least 1".into(),
            ));
        }

        let items = inputs
            .into_iter()
            .map(|input| {
                let priority = options
                    .priority_of
                    .as_ref()
                    .map_or(Priority::Normal, |priority_of| priority_of(&input));
                Item::new(input, priority, max_attempts)
            })
            .collect();
        let name = options
            .name
            .unwrap_or_else(|| format!("batch-{}", &Uuid::new_v4().simple().to_string()[..8]));

        Ok(Job::new(name, items, Observer::new(options.on_item_settled)))
    }

    /// Registers the job and starts its scheduler in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, job: Job<H::Input, H::Output>) -> Result<JobHandle<H::Input, H::Output>> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        if job.status != JobStatus::Pending {
            return Err(EngineError::Validation(format!(
                "job {} is {}, only pending jobs can be submitted",
                job.id, job.status
            )));
        }
        if job.items.is_empty() {
            return Err(EngineError::Validation(
                "job must contain at least one item".into(),
            ));
        }

        let job_id = job.id;
        let name = job.name.clone();
        let total = job.total_items;
        let ctx = {
            let mut jobs = inner.jobs.write();
            if jobs.contains_key(&job_id) {
                return Err(EngineError::Validation(format!(
                    "job {job_id} is already active"
                )));
            }
            let limit = inner.config.max_concurrent_jobs;
            if jobs.len() >= limit {
                warn!(%job_id, running = jobs.len(), limit, "rejecting job, engine at capacity");
                return Err(EngineError::Capacity {
                    running: jobs.len(),
                    limit,
                });
            }
            let ctx = Arc::new(JobContext::new(
                job,
                inner.shutdown.child_token(),
                Arc::clone(&inner.counters),
            ));
            jobs.insert(job_id, Arc::clone(&ctx));
            ctx
        };
        inner.counters.record_submitted();

        let (done_tx, done_rx) = oneshot::channel();
        let progress = ctx.subscribe();
        let span = info_span!("job", %job_id, name = %name);
        info!(parent: &span, total, "job submitted");
        inner
            .tracker
            .spawn(Arc::clone(inner).supervise(ctx, done_tx).instrument(span));

        Ok(JobHandle {
            id: job_id,
            progress,
            done: done_rx,
        })
    }

    /// Submits the job and waits for its final snapshot.
    pub async fn run(&self, job: Job<H::Input, H::Output>) -> Result<Job<H::Input, H::Output>> {
        self.submit(job)?.wait().await
    }

    /// Snapshot of an active job. `None` once the job has settled.
    pub fn get_status(&self, job_id: Uuid) -> Option<Job<H::Input, H::Output>> {
        let ctx = self.inner.jobs.read().get(&job_id).cloned()?;
        Some(ctx.snapshot())
    }

    /// Latest progress of an active job.
    pub fn progress(&self, job_id: Uuid) -> Result<Progress> {
        let ctx = self
            .inner
            .jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(EngineError::JobNotFound(job_id))?;
        let job = ctx.job.read();
        Ok(Progress::of(&*job))
    }

    /// Asks an active job to stop. Returns `false` for unknown or settled jobs.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let Some(ctx) = self.inner.jobs.read().get(&job_id).cloned() else {
            return false;
        };
        if ctx.job.read().is_terminal() {
            return false;
        }
        if !ctx.cancel.is_cancelled() {
            info!(%job_id, "job cancellation requested");
            ctx.cancel.cancel();
        }
        true
    }

    pub fn active_job_ids(&self) -> Vec<Uuid> {
        self.inner.jobs.read().keys().copied().collect()
    }

    pub fn statistics(&self) -> EngineStatistics {
        let mut stats = self.inner.counters.snapshot();
        let jobs = self.inner.jobs.read();
        stats.active_jobs = jobs.len();
        stats.running_jobs = jobs
            .values()
            .filter(|ctx| !ctx.cancel.is_cancelled() && ctx.job.read().status == JobStatus::Running)
            .count();
        stats
    }

    /// Cancels every active job, rejects new submissions and waits for all
    /// schedulers to settle.
    pub async fn shutdown(&self) {
        let active = self.inner.jobs.read().len();
        info!(active, "engine shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("engine shut down");
    }
}

impl<H: Handler> Inner<H> {
    // Recover-and-convert boundary: whatever happens inside the scheduler,
    // the job settles and the handle receives a terminal snapshot.
    async fn supervise(
        self: Arc<Self>,
        ctx: Arc<JobContext<H::Input, H::Output>>,
        done: oneshot::Sender<Job<H::Input, H::Output>>,
    ) {
        let executor = ItemExecutor::new(
            Arc::clone(&self.handler),
            Arc::clone(&self.limiter),
            Arc::clone(&self.retry),
        );
        let scheduler = JobScheduler::new(executor, self.config.max_concurrent_items_per_job);

        let run_ctx = Arc::clone(&ctx);
        let joined = tokio::spawn(async move { scheduler.run(run_ctx).await }.in_current_span()).await;
        let status = match joined {
            Ok(status) => status,
            Err(err) => {
                let message = if err.is_panic() {
                    format!("scheduler panicked: {}", panic_message(err.into_panic().as_ref()))
                } else {
                    "scheduler task was cancelled".to_string()
                };
                error!(error = %message, "job failed");
                self.fail_job(&ctx, message);
                JobStatus::Failed
            }
        };
        self.counters.record_job(status);

        self.jobs.write().remove(&ctx.job_id);
        let job = ctx.snapshot();
        info!(
            %status,
            successful = job.successful_items,
            failed = job.failed_items,
            cancelled = job.cancelled_items,
            "job finished"
        );
        // The caller may have dropped the handle.
        let _ = done.send(job);
    }

    fn fail_job(&self, ctx: &JobContext<H::Input, H::Output>, message: String) {
        let unsettled = ctx.job.read().unsettled_indices();
        for index in unsettled {
            ctx.settle(
                index,
                ItemOutcome::Cancelled {
                    reason: format!("job failed: {message}"),
                },
            );
        }
        ctx.job.write().fail(message);
        ctx.publish();
    }
}
