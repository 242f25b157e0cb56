//! Execution side of the task lifecycle: worker hooks, the worker loop, and
//! the revisit scheduler.

pub mod middleware;
pub mod scheduler;
pub mod worker;

pub use middleware::WorkerMiddleware;
pub use scheduler::{CycleReport, RevisitScheduler, SchedulerConfig};
pub use worker::{Worker, WorkerConfig};
