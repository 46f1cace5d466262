//! Runs a single item through rate limiting, the handler and the retry policy.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::{ItemOutcome, ItemStatus, Job, Progress};
use crate::engine::Counters;
use crate::handler::{Handler, ItemContext};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Shared state of one submitted job.
///
/// The job lock is held only for short synchronous updates, never across an
/// await point.
pub(crate) struct JobContext<I, O> {
    pub(crate) job_id: Uuid,
    pub(crate) job: RwLock<Job<I, O>>,
    pub(crate) cancel: CancellationToken,
    progress: watch::Sender<Progress>,
    counters: Arc<Counters>,
}

impl<I: Clone, O: Clone> JobContext<I, O> {
    pub(crate) fn new(job: Job<I, O>, cancel: CancellationToken, counters: Arc<Counters>) -> Self {
        let (progress, _) = watch::channel(Progress::of(&job));
        Self {
            job_id: job.id,
            job: RwLock::new(job),
            cancel,
            progress,
            counters,
        }
    }

    pub(crate) fn snapshot(&self) -> Job<I, O> {
        self.job.read().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub(crate) fn publish(&self) {
        let progress = Progress::of(&*self.job.read());
        self.progress.send_replace(progress);
    }

    /// Applies a terminal outcome to an item, then updates engine statistics,
    /// publishes progress and notifies the job's observer outside the lock.
    pub(crate) fn settle(&self, index: usize, outcome: ItemOutcome<O>) -> ItemStatus {
        let (status, notify) = {
            let mut job = self.job.write();
            let applied = job.settle_item(index, outcome);
            let Some(item) = job.items.get(index) else {
                return ItemStatus::Failed;
            };
            let status = item.status;
            if !applied {
                return status;
            }
            self.counters.record_item(status);
            self.progress.send_replace(Progress::of(&*job));
            let notify = job
                .observer
                .is_set()
                .then(|| (job.observer.clone(), item.clone()));
            (status, notify)
        };
        if let Some((observer, item)) = notify {
            observer.notify(&item);
        }
        status
    }
}

pub(crate) struct ItemExecutor<H: Handler> {
    handler: Arc<H>,
    limiter: Arc<RateLimiter>,
    retry: Arc<dyn RetryPolicy>,
}

impl<H: Handler> Clone for ItemExecutor<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            limiter: Arc::clone(&self.limiter),
            retry: Arc::clone(&self.retry),
        }
    }
}

impl<H: Handler> ItemExecutor<H> {
    pub(crate) fn new(handler: Arc<H>, limiter: Arc<RateLimiter>, retry: Arc<dyn RetryPolicy>) -> Self {
        Self {
            handler,
            limiter,
            retry,
        }
    }

    /// Drives the item at `index` to a terminal status. Never fails: handler
    /// errors and panics end up recorded on the item.
    pub(crate) async fn execute(
        &self,
        ctx: &JobContext<H::Input, H::Output>,
        index: usize,
    ) -> ItemStatus {
        let (item_id, input, max_attempts) = {
            let mut job = ctx.job.write();
            let item = &mut job.items[index];
            item.mark_running();
            (item.id, item.input.clone(), item.max_attempts)
        };
        let class = self.handler.resource_class(&input);
        debug!(%item_id, class = %class, "item started");

        let outcome = self
            .attempt_until_settled(ctx, index, item_id, &input, max_attempts, &class)
            .await;
        let status = ctx.settle(index, outcome);
        debug!(%item_id, %status, "item settled");
        status
    }

    async fn attempt_until_settled(
        &self,
        ctx: &JobContext<H::Input, H::Output>,
        index: usize,
        item_id: Uuid,
        input: &H::Input,
        max_attempts: u32,
        class: &str,
    ) -> ItemOutcome<H::Output> {
        loop {
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    return ItemOutcome::Cancelled {
                        reason: "job cancelled before attempt".to_string(),
                    };
                }
                () = self.limiter.acquire(class) => {}
            }

            let attempt = ctx.job.write().items[index].begin_attempt();
            let item_ctx = ItemContext {
                job_id: ctx.job_id,
                item_id,
                attempt,
                cancellation: ctx.cancel.clone(),
            };

            let started = Instant::now();
            // The call itself stays inside the caught future so panics in the
            // synchronous part of `handle` are contained too.
            let result = AssertUnwindSafe(async {
                self.handler.handle(item_ctx, input.clone()).await
            })
            .catch_unwind()
            .await;
            let elapsed = started.elapsed();

            let err = match result {
                Ok(Ok(output)) => return ItemOutcome::Completed { output, elapsed },
                Ok(Err(err)) => err,
                Err(payload) => {
                    anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref()))
                }
            };

            if !self.retry.should_retry(attempt, max_attempts, &err) {
                return ItemOutcome::Failed {
                    error: format!("{err:#}"),
                    elapsed,
                };
            }
            if ctx.cancel.is_cancelled() {
                return ItemOutcome::Cancelled {
                    reason: format!("job cancelled after attempt {attempt}: {err:#}"),
                };
            }

            let delay = self.retry.delay(attempt);
            warn!(
                %item_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "attempt failed, retrying"
            );
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    return ItemOutcome::Cancelled {
                        reason: format!("job cancelled during backoff after attempt {attempt}: {err:#}"),
                    };
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
