use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch priority of an item within its job. Higher runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "PENDING"),
            ItemStatus::Running => write!(f, "RUNNING"),
            ItemStatus::Completed => write!(f, "COMPLETED"),
            ItemStatus::Failed => write!(f, "FAILED"),
            ItemStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// How an item's execution ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ItemOutcome<O> {
    Completed { output: O, elapsed: Duration },
    Failed { error: String, elapsed: Duration },
    Cancelled { reason: String },
}

/// One unit of work inside a [`Job`](super::Job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item<I, O> {
    pub id: Uuid,
    pub input: I,
    pub priority: Priority,
    pub status: ItemStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Set only when `status` is `Completed`.
    pub result: Option<O>,
    /// Set only when `status` is `Failed` or `Cancelled`.
    pub error: Option<String>,
    /// Duration of the final handler invocation.
    pub processing_time: Option<Duration>,
    /// Position in which the scheduler dispatched this item.
    pub dispatch_index: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<I, O> Item<I, O> {
    pub(crate) fn new(input: I, priority: Priority, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            priority,
            status: ItemStatus::Pending,
            attempt_count: 0,
            max_attempts,
            result: None,
            error: None,
            processing_time: None,
            dispatch_index: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn mark_dispatched(&mut self, index: usize) {
        self.dispatch_index = Some(index);
    }

    pub(crate) fn mark_running(&mut self) {
        if self.status != ItemStatus::Pending {
            return;
        }
        self.status = ItemStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Records the start of another handler invocation and returns its number.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    /// Applies a terminal outcome. Returns `false` if the item had already settled.
    pub(crate) fn settle(&mut self, outcome: ItemOutcome<O>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match outcome {
            ItemOutcome::Completed { output, elapsed } => {
                self.status = ItemStatus::Completed;
                self.result = Some(output);
                self.error = None;
                self.processing_time = Some(elapsed);
            }
            ItemOutcome::Failed { error, elapsed } => {
                self.status = ItemStatus::Failed;
                self.result = None;
                self.error = Some(error);
                self.processing_time = Some(elapsed);
            }
            ItemOutcome::Cancelled { reason } => {
                self.status = ItemStatus::Cancelled;
                self.result = None;
                self.error = Some(reason);
            }
        }
        self.completed_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> Item<&'static str, u32> {
        Item::new("B00TEST123", Priority::High, 3)
    }

    #[test]
    fn item_creation_defaults() {
        let item = item();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.max_attempts, 3);
        assert!(item.result.is_none());
        assert!(item.error.is_none());
        assert!(item.started_at.is_none());
        assert!(item.dispatch_index.is_none());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn started_at_is_set_once() {
        let mut item = item();
        item.mark_running();
        let first = item.started_at;
        assert!(first.is_some());
        item.mark_running();
        assert_eq!(item.started_at, first);
        assert_eq!(item.status, ItemStatus::Running);
    }

    #[test]
    fn completed_item_holds_only_result() {
        let mut item = item();
        item.mark_running();
        item.begin_attempt();
        assert!(item.settle(ItemOutcome::Completed {
            output: 42,
            elapsed: Duration::from_millis(5),
        }));
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.result, Some(42));
        assert!(item.error.is_none());
        assert_eq!(item.processing_time, Some(Duration::from_millis(5)));
        assert!(item.completed_at.is_some());
    }

    #[test]
    fn failed_item_holds_only_error() {
        let mut item = item();
        item.mark_running();
        assert!(item.settle(ItemOutcome::Failed {
            error: "404".into(),
            elapsed: Duration::from_millis(1),
        }));
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.result.is_none());
        assert_eq!(item.error.as_deref(), Some("404"));
    }

    #[test]
    fn terminal_items_do_not_transition() {
        let mut item = item();
        item.settle(ItemOutcome::Cancelled {
            reason: "job cancelled".into(),
        });
        assert!(!item.settle(ItemOutcome::Completed {
            output: 1,
            elapsed: Duration::ZERO,
        }));
        assert_eq!(item.status, ItemStatus::Cancelled);
        item.mark_running();
        assert_eq!(item.status, ItemStatus::Cancelled);
    }

    #[test]
    fn status_display() {
        assert_eq!(ItemStatus::Pending.to_string(), "PENDING");
        assert_eq!(ItemStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!(Priority::Critical.to_string(), "CRITICAL");
    }
}
