//! Task scheduling for the core.
//!
//! A fixed pool of isolated workers fed from a priority queue. Every accepted
//! task settles exactly once: with the worker's result, with the worker's last
//! error once retries are spent, or with a timeout.

mod error;
mod pool;
mod priority;
mod task;
mod worker;

pub use error::SchedulerError;
pub use pool::{SchedulerConfig, SchedulerStats, TaskScheduler};
pub use priority::{Priority, PriorityQueue};
pub use task::{ResultRx, Task, TaskOptions};
pub use worker::{Executor, FnExecutor};
