//! Task execution infrastructure.
//!
//! This module provides the executor facade, its worker threads, the job
//! queue items they consume, and the panic boundary every job runs behind.

pub(crate) mod job;
pub mod panic_handler;
pub mod pool;
pub mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy, TaskPanic};
pub use pool::Executor;
pub use worker::{WorkerId, WorkerState};
