//! KAIROS - embeddable task execution core
//!
//! Hand units of work to a bounded pool of worker threads, get a [`Future`]
//! back immediately, and later poll it, block on it or cancel it.
//!
//! # Quick Start
//!
//! ```no_run
//! use kairos::prelude::*;
//!
//! let executor: Executor<u64> = Executor::with_workers(4).unwrap();
//!
//! let future = executor.submit(|token| {
//!     let mut acc = 0u64;
//!     for i in 0..1_000_000u64 {
//!         if i % 10_000 == 0 {
//!             token.check()?;
//!         }
//!         acc += i;
//!     }
//!     Ok(acc)
//! });
//!
//! println!("sum: {}", future.wait().unwrap());
//! executor.shutdown();
//! ```
//!
//! # Features
//!
//! - **Futures**: single-assignment cells with `wait`, `get`, `is_ready` and `cancel`
//! - **Cooperative cancellation**: parent-linked tokens, with deadline-bound variants
//! - **Fault isolation**: a panicking task fails its own future, never the worker
//! - **Graceful shutdown**: blocked submitters are released, workers are joined
//! - **Embedding bridge**: numeric handles and dynamic values for scripting hosts
//! - **Telemetry**: outcome counters and task run-time histogram

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod bridge;
pub mod builtin;
pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod prelude;
pub mod runtime;
pub mod telemetry;
mod timer;

// Re-export key types at crate root
pub use bridge::{AsyncBridge, Handle, Value};
pub use cancel::{CancellationToken, Cancelled};
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result, TaskError};
pub use executor::{Executor, PanicStrategy, TaskPanic};
pub use future::{Future, FutureId, FutureState};
pub use runtime::{default_bridge, default_executor, init, init_with_config};
