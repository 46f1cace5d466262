use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::{Item, ItemOutcome, ItemStatus, Priority};

/// Tracks the lifecycle status of a job.
///
/// `Failed` is reserved for engine-level failures; a job whose items failed
/// still reaches `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

pub type PriorityFn<I> = Arc<dyn Fn(&I) -> Priority + Send + Sync>;

/// Called with a snapshot of each item as it reaches a terminal status.
pub type ItemObserver<I, O> = Arc<dyn Fn(&Item<I, O>) + Send + Sync>;

/// Per-job settings passed to [`Engine::create_job`](crate::Engine::create_job).
pub struct JobOptions<I, O> {
    pub name: Option<String>,
    /// Overrides the engine's `max_attempts` for every item of the job.
    pub max_attempts: Option<u32>,
    /// Classifies inputs; every item is `Normal` when absent.
    pub priority_of: Option<PriorityFn<I>>,
    pub on_item_settled: Option<ItemObserver<I, O>>,
}

impl<I, O> Default for JobOptions<I, O> {
    fn default() -> Self {
        Self {
            name: None,
            max_attempts: None,
            priority_of: None,
            on_item_settled: None,
        }
    }
}

impl<I, O> JobOptions<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn priority_of(mut self, f: impl Fn(&I) -> Priority + Send + Sync + 'static) -> Self {
        self.priority_of = Some(Arc::new(f));
        self
    }

    pub fn on_item_settled(mut self, f: impl Fn(&Item<I, O>) + Send + Sync + 'static) -> Self {
        self.on_item_settled = Some(Arc::new(f));
        self
    }
}

// Wrapper so `Job` can stay `Debug`, `Clone` and serde-friendly.
pub(crate) struct Observer<I, O>(Option<ItemObserver<I, O>>);

impl<I, O> Observer<I, O> {
    pub(crate) fn new(f: Option<ItemObserver<I, O>>) -> Self {
        Self(f)
    }

    pub(crate) fn notify(&self, item: &Item<I, O>) {
        if let Some(f) = &self.0 {
            f(item);
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl<I, O> Default for Observer<I, O> {
    fn default() -> Self {
        Self(None)
    }
}

impl<I, O> Clone for Observer<I, O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<I, O> fmt::Debug for Observer<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "Observer(set)" } else { "Observer(none)" })
    }
}

/// A batch of items submitted and tracked together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<I, O> {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    /// Sorted by descending priority; ties keep input order.
    pub items: Vec<Item<I, O>>,
    pub total_items: usize,
    /// Items that reached `Completed` or `Failed`.
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub cancelled_items: usize,
    pub progress_percentage: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Set only when the job itself failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip, default = "Observer::default")]
    pub(crate) observer: Observer<I, O>,
}

impl<I, O> Job<I, O> {
    pub(crate) fn new(name: String, mut items: Vec<Item<I, O>>, observer: Observer<I, O>) -> Self {
        // Stable, so equal priorities keep their input order.
        items.sort_by_key(|item| std::cmp::Reverse(item.priority));
        Self {
            id: Uuid::new_v4(),
            name,
            status: JobStatus::Pending,
            total_items: items.len(),
            items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            cancelled_items: 0,
            progress_percentage: 0.0,
            estimated_completion: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            observer,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn items_with_status(&self, status: ItemStatus) -> impl Iterator<Item = &Item<I, O>> {
        self.items.iter().filter(move |item| item.status == status)
    }

    pub(crate) fn mark_running(&mut self) {
        if self.status != JobStatus::Pending {
            return;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Settles one item and refreshes the cached counters and progress.
    /// Returns `false` if the item had already settled.
    pub(crate) fn settle_item(&mut self, index: usize, outcome: ItemOutcome<O>) -> bool {
        let Some(item) = self.items.get_mut(index) else {
            return false;
        };
        if !item.settle(outcome) {
            return false;
        }
        let status = item.status;
        match status {
            ItemStatus::Completed => {
                self.successful_items += 1;
                self.processed_items += 1;
            }
            ItemStatus::Failed => {
                self.failed_items += 1;
                self.processed_items += 1;
            }
            ItemStatus::Cancelled => self.cancelled_items += 1,
            ItemStatus::Pending | ItemStatus::Running => {}
        }
        self.recompute_progress(Utc::now());
        true
    }

    /// Indices of items never handed to an executor.
    pub(crate) fn pending_indices(&self) -> Vec<usize> {
        self.indices_where(|item| item.status == ItemStatus::Pending)
    }

    /// Indices of items that have not reached a terminal status.
    pub(crate) fn unsettled_indices(&self) -> Vec<usize> {
        self.indices_where(|item| !item.is_terminal())
    }

    fn indices_where(&self, pred: impl Fn(&Item<I, O>) -> bool) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| pred(item))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        if self.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, message: String) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(message);
        self.finish(JobStatus::Failed);
    }

    fn recompute_progress(&mut self, now: DateTime<Utc>) {
        if self.total_items == 0 {
            return;
        }
        self.progress_percentage = self.processed_items as f64 / self.total_items as f64 * 100.0;

        if self.processed_items == 0 {
            return;
        }
        let Some(started_at) = self.started_at else {
            return;
        };
        let elapsed = now - started_at;
        let per_item = elapsed / self.processed_items as i32;
        let remaining = self.total_items - self.processed_items;
        self.estimated_completion = Some(now + per_item * remaining as i32);
    }

    /// Time since the job started running, up to its completion if settled.
    pub fn elapsed(&self) -> Option<TimeDelta> {
        let started_at = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job_with(priorities: &[Priority]) -> Job<usize, String> {
        let items = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| Item::new(i, *p, 3))
            .collect();
        Job::new("test".into(), items, Observer::default())
    }

    fn completed(output: &str) -> ItemOutcome<String> {
        ItemOutcome::Completed {
            output: output.into(),
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = job_with(&[Priority::Normal; 3]);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_items, 3);
        assert_eq!(job.processed_items, 0);
        assert_eq!(job.progress_percentage, 0.0);
        assert!(job.estimated_completion.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn items_sorted_by_priority_stably() {
        use Priority::*;
        let job = job_with(&[Low, Critical, Normal, High, Critical]);
        let order: Vec<(usize, Priority)> =
            job.items.iter().map(|i| (i.input, i.priority)).collect();
        assert_eq!(
            order,
            vec![
                (1, Critical),
                (4, Critical),
                (3, High),
                (2, Normal),
                (0, Low)
            ]
        );
    }

    #[test]
    fn settle_updates_counters_and_progress() {
        let mut job = job_with(&[Priority::Normal; 4]);
        job.mark_running();

        assert!(job.settle_item(0, completed("ok")));
        assert_eq!(job.processed_items, 1);
        assert_eq!(job.successful_items, 1);
        assert_eq!(job.progress_percentage, 25.0);
        assert!(job.estimated_completion.is_some());

        job.settle_item(
            1,
            ItemOutcome::Failed {
                error: "timeout".into(),
                elapsed: Duration::from_millis(1),
            },
        );
        assert_eq!(job.processed_items, 2);
        assert_eq!(job.failed_items, 1);
        assert_eq!(job.progress_percentage, 50.0);
    }

    #[test]
    fn settling_twice_is_ignored() {
        let mut job = job_with(&[Priority::Normal; 2]);
        job.mark_running();
        assert!(job.settle_item(0, completed("a")));
        assert!(!job.settle_item(0, completed("b")));
        assert_eq!(job.successful_items, 1);
        assert!(!job.settle_item(9, completed("c")));
    }

    #[test]
    fn progress_reaches_exactly_one_hundred() {
        let mut job = job_with(&[Priority::Normal; 3]);
        job.mark_running();
        let mut last = 0.0;
        for index in 0..3 {
            job.settle_item(index, completed("ok"));
            assert!(job.progress_percentage >= last);
            last = job.progress_percentage;
        }
        assert_eq!(job.progress_percentage, 100.0);
    }

    #[test]
    fn pending_and_unsettled_indices() {
        let mut job = job_with(&[Priority::Normal; 3]);
        job.mark_running();
        job.settle_item(0, completed("ok"));
        job.items[1].mark_running();

        assert_eq!(job.pending_indices(), vec![2]);
        assert_eq!(job.unsettled_indices(), vec![1, 2]);

        job.settle_item(
            2,
            ItemOutcome::Cancelled {
                reason: "job cancelled".into(),
            },
        );
        assert_eq!(job.cancelled_items, 1);
        assert_eq!(job.processed_items, 1);
        assert!(job.pending_indices().is_empty());
    }

    #[test]
    fn finish_is_final() {
        let mut job = job_with(&[Priority::Normal]);
        job.mark_running();
        job.finish(JobStatus::Completed);
        job.fail("late".into());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn fail_records_message() {
        let mut job = job_with(&[Priority::Normal]);
        job.mark_running();
        job.fail("scheduler panicked".into());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("scheduler panicked"));
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = job_with(&[Priority::High]);
        let json = serde_json::to_string(&job).unwrap();
        let back: Job<usize, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.items[0].priority, Priority::High);
        assert!(!back.observer.is_set());
    }
}
