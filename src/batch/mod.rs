mod item;
mod job;
mod progress;

pub use item::{Item, ItemStatus, Priority};
pub use job::{ItemObserver, Job, JobOptions, JobStatus, PriorityFn};
pub use progress::{ItemFailure, JobSummary, Progress};

pub(crate) use item::ItemOutcome;
pub(crate) use job::Observer;
