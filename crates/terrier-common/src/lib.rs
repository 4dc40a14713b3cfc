//! Shared concurrency primitives: the worker pool that drives background
//! work and the shutdown flag observed by every background loop.

pub mod shutdown;
pub mod worker_pool;

pub use shutdown::ShutdownFlag;
pub use worker_pool::{Task, TaskQueue, WorkerPool};
