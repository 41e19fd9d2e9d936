//! Process-wide default executor.
//!
//! Libraries that just need "somewhere to run this" share one lazily created
//! `Executor<Value>` and an [`AsyncBridge`] over it. Both are created at most
//! once and live until the process exits; they are never shut down
//! implicitly. Code that wants its own lifecycle should build a private
//! [`Executor`] instead.

use crate::bridge::{AsyncBridge, Value};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::Executor;
use parking_lot::Mutex;
use std::sync::OnceLock;

static DEFAULT_EXECUTOR: OnceLock<Executor<Value>> = OnceLock::new();
static DEFAULT_BRIDGE: OnceLock<AsyncBridge<'static>> = OnceLock::new();

// serializes construction so only one worker pool is ever spawned
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Create the default executor with `Config::default()`.
pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

/// Create the default executor with `config`.
///
/// Fails with [`Error::AlreadyInitialized`] if it already exists, including
/// when an earlier call to [`default_executor`] created it implicitly.
pub fn init_with_config(config: Config) -> Result<()> {
    let _guard = INIT_LOCK.lock();

    if DEFAULT_EXECUTOR.get().is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let executor = Executor::new(config)?;
    let _ = DEFAULT_EXECUTOR.set(executor);
    Ok(())
}

pub fn is_initialized() -> bool {
    DEFAULT_EXECUTOR.get().is_some()
}

/// The default executor, created on first use.
pub fn default_executor() -> Result<&'static Executor<Value>> {
    if let Some(executor) = DEFAULT_EXECUTOR.get() {
        return Ok(executor);
    }

    let _guard = INIT_LOCK.lock();
    if let Some(executor) = DEFAULT_EXECUTOR.get() {
        return Ok(executor);
    }

    let executor = Executor::new(Config::default())?;
    Ok(DEFAULT_EXECUTOR.get_or_init(|| executor))
}

/// Bridge over the default executor, sharing one method registry process-wide.
pub fn default_bridge() -> Result<&'static AsyncBridge<'static>> {
    if let Some(bridge) = DEFAULT_BRIDGE.get() {
        return Ok(bridge);
    }

    let executor = default_executor()?;
    Ok(DEFAULT_BRIDGE.get_or_init(|| AsyncBridge::new(executor)))
}
