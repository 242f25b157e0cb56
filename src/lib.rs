//! # channel-tasks
//!
//! Task lifecycle engine for channel intelligence work.
//!
//! Persists tasks in Postgres, hands them to a pgmq-backed dispatcher,
//! drives their state machine from the worker side, and periodically
//! schedules revisits of tracked channels.

pub mod backend;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod service;
pub mod store;
pub mod telemetry;
