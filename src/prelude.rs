pub use crate::bridge::{AsyncBridge, Handle, Value};
pub use crate::cancel::{CancellationToken, Cancelled};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result, TaskError};
pub use crate::executor::{Executor, PanicStrategy};
pub use crate::future::{Future, FutureId, FutureState};

pub use crate::runtime::{default_bridge, default_executor};
pub use crate::telemetry::MetricsSnapshot;
