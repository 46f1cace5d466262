//! Progress snapshots and completion summaries computed from job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::ItemStatus;
use super::job::{Job, JobStatus};

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub percentage: f64,
    pub elapsed_ms: i64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn of<I, O>(job: &Job<I, O>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total: job.total_items,
            processed: job.processed_items,
            successful: job.successful_items,
            failed: job.failed_items,
            cancelled: job.cancelled_items,
            percentage: job.progress_percentage,
            elapsed_ms: job.elapsed().map_or(0, |d| d.num_milliseconds()),
            estimated_completion: job.estimated_completion,
        }
    }

    /// Items not yet processed or cancelled.
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.processed)
            .saturating_sub(self.cancelled)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One failed or cancelled item in a [`JobSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: Uuid,
    pub status: ItemStatus,
    pub attempts: u32,
    pub error: String,
}

/// Structured record produced once a job settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub cancelled_items: usize,
    pub total_attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub failures: Vec<ItemFailure>,
}

impl JobSummary {
    pub fn from_job<I, O>(job: &Job<I, O>) -> Self {
        let failures = job
            .items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Failed | ItemStatus::Cancelled))
            .map(|item| ItemFailure {
                item_id: item.id,
                status: item.status,
                attempts: item.attempt_count,
                error: item.error.clone().unwrap_or_default(),
            })
            .collect();

        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: job.status,
            total_items: job.total_items,
            successful_items: job.successful_items,
            failed_items: job.failed_items,
            cancelled_items: job.cancelled_items,
            total_attempts: job.items.iter().map(|item| item.attempt_count).sum(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_ms: job.elapsed().map_or(0, |d| d.num_milliseconds()),
            error: job.error.clone(),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::item::{Item, ItemOutcome, Priority};
    use crate::batch::job::Observer;
    use std::time::Duration;

    fn job(n: usize) -> Job<u32, u32> {
        let items = (0..n as u32).map(|i| Item::new(i, Priority::Normal, 2)).collect();
        Job::new("progress".into(), items, Observer::default())
    }

    #[test]
    fn progress_of_pending_job() {
        let job = job(4);
        let progress = Progress::of(&job);
        assert_eq!(progress.total, 4);
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.percentage, 0.0);
        assert_eq!(progress.elapsed_ms, 0);
        assert_eq!(progress.remaining(), 4);
        assert!(progress.estimated_completion.is_none());
        assert!(!progress.is_finished());
    }

    #[test]
    fn progress_tracks_settled_items() {
        let mut job = job(4);
        job.mark_running();
        job.settle_item(
            0,
            ItemOutcome::Completed {
                output: 7,
                elapsed: Duration::from_millis(3),
            },
        );
        job.settle_item(
            1,
            ItemOutcome::Cancelled {
                reason: "job cancelled".into(),
            },
        );

        let progress = Progress::of(&job);
        assert_eq!(progress.processed, 1);
        assert_eq!(progress.cancelled, 1);
        assert_eq!(progress.percentage, 25.0);
        assert_eq!(progress.remaining(), 2);
        assert!(progress.estimated_completion.is_some());
    }

    #[test]
    fn summary_lists_failures() {
        let mut job = job(3);
        job.mark_running();
        job.items[0].begin_attempt();
        job.settle_item(
            0,
            ItemOutcome::Completed {
                output: 1,
                elapsed: Duration::ZERO,
            },
        );
        job.items[1].begin_attempt();
        job.items[1].begin_attempt();
        job.settle_item(
            1,
            ItemOutcome::Failed {
                error: "HTTP 503".into(),
                elapsed: Duration::ZERO,
            },
        );
        for index in job.pending_indices() {
            job.settle_item(
                index,
                ItemOutcome::Cancelled {
                    reason: "job cancelled".into(),
                },
            );
        }
        job.finish(JobStatus::Cancelled);

        let summary = JobSummary::from_job(&job);
        assert_eq!(summary.status, JobStatus::Cancelled);
        assert_eq!(summary.successful_items, 1);
        assert_eq!(summary.failed_items, 1);
        assert_eq!(summary.cancelled_items, 1);
        assert_eq!(summary.total_attempts, 3);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].error, "HTTP 503");
        assert_eq!(summary.failures[0].attempts, 2);
        assert_eq!(summary.failures[1].status, ItemStatus::Cancelled);
        assert!(summary.completed_at.is_some());
    }
}
