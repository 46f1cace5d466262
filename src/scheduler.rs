//! Dispatches a job's items in priority order under a per-job concurrency bound.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::batch::{ItemOutcome, JobStatus};
use crate::executor::{ItemExecutor, JobContext};
use crate::handler::Handler;

pub(crate) struct JobScheduler<H: Handler> {
    executor: ItemExecutor<H>,
    max_concurrent_items: usize,
}

impl<H: Handler> JobScheduler<H> {
    pub(crate) fn new(executor: ItemExecutor<H>, max_concurrent_items: usize) -> Self {
        Self {
            executor,
            max_concurrent_items: max_concurrent_items.max(1),
        }
    }

    /// Runs every item of the job and settles the job.
    ///
    /// Items are dispatched in stored order (highest priority first) as soon
    /// as a slot frees up. On cancellation dispatch stops, in-flight items
    /// settle on their own, never-dispatched items are cancelled and the job
    /// ends `Cancelled`.
    ///
    /// A panic escaping an item task is re-raised so the engine can fail the
    /// job as a whole.
    pub(crate) async fn run(&self, ctx: Arc<JobContext<H::Input, H::Output>>) -> JobStatus {
        let total = {
            let mut job = ctx.job.write();
            job.mark_running();
            job.items.len()
        };
        ctx.publish();
        info!(total, max_concurrent_items = self.max_concurrent_items, "job started");

        let slots = Arc::new(Semaphore::new(self.max_concurrent_items));
        let mut tasks = JoinSet::new();

        for index in 0..total {
            let permit = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item_id = {
                let mut job = ctx.job.write();
                let item = &mut job.items[index];
                item.mark_dispatched(index);
                item.id
            };
            debug!(%item_id, index, "dispatching item");

            let executor = self.executor.clone();
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                executor.execute(&ctx, index).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }

        let undispatched = ctx.job.read().pending_indices();
        if !undispatched.is_empty() {
            debug!(count = undispatched.len(), "cancelling undispatched items");
        }
        for index in undispatched {
            ctx.settle(
                index,
                ItemOutcome::Cancelled {
                    reason: "job cancelled before dispatch".to_string(),
                },
            );
        }

        let status = {
            let mut job = ctx.job.write();
            // A cancelled job stays cancelled even if every in-flight item finished.
            let status = if job.cancelled_items > 0 || ctx.cancel.is_cancelled() {
                JobStatus::Cancelled
            } else {
                JobStatus::Completed
            };
            job.finish(status);
            status
        };
        ctx.publish();
        status
    }
}
