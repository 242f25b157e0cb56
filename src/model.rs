//! Core data model.
//!
//! A task is one requested unit of asynchronous channel work and its
//! lifecycle. A tracked channel is a channel under periodic monitoring.

pub mod channel;
pub mod task;

pub use channel::TrackedChannel;
pub use task::{NewTask, Task, TaskId, TaskMessage, TaskStatus, TaskType};
