//! Built-in timer utilities.
//!
//! Each builtin submits a task that waits on its own cancellation token for
//! the requested duration, so cancelling the handle (or shutting down the
//! executor) ends the wait early.

use crate::bridge::{AsyncBridge, Handle, Value};
use crate::cancel::{CancellationToken, Cancelled};
use crate::error::{Error, Result, TaskError};
use std::time::Duration;

/// Future completing with `"Slept for N.NN seconds"` after `seconds`.
pub fn sleep(bridge: &AsyncBridge<'_>, seconds: f64) -> Result<Handle> {
    let duration = duration_from_secs(seconds, "sleep")?;
    Ok(bridge.submit(move |token| {
        pause(token, duration)?;
        Ok(Value::from(format!("Slept for {:.2} seconds", seconds)))
    }))
}

/// Future completing with `"Delayed for N milliseconds"` after `millis`.
pub fn delay(bridge: &AsyncBridge<'_>, millis: f64) -> Result<Handle> {
    let duration = duration_from_secs(millis / 1000.0, "delay")?;
    Ok(bridge.submit(move |token| {
        pause(token, duration)?;
        Ok(Value::from(format!("Delayed for {:.0} milliseconds", millis)))
    }))
}

/// Future completing with `message` (or a default text when empty) after `seconds`.
pub fn timer(bridge: &AsyncBridge<'_>, seconds: f64, message: &str) -> Result<Handle> {
    let duration = duration_from_secs(seconds, "timer")?;
    let message = message.to_string();
    Ok(bridge.submit(move |token| {
        pause(token, duration)?;
        Ok(Value::from(timer_message(seconds, message)))
    }))
}

/// Expose the builtins as named methods: `sleep(_)`, `delay(_)`, `timer(_,_)`.
pub fn register(bridge: &AsyncBridge<'_>) {
    bridge.register_async_method("sleep", |token, args| {
        let seconds = num_arg(args, 0, "sleep")?;
        pause(token, duration_from_secs(seconds, "sleep")?)?;
        Ok(Value::from(format!("Slept for {:.2} seconds", seconds)))
    });

    bridge.register_async_method("delay", |token, args| {
        let millis = num_arg(args, 0, "delay")?;
        pause(token, duration_from_secs(millis / 1000.0, "delay")?)?;
        Ok(Value::from(format!("Delayed for {:.0} milliseconds", millis)))
    });

    bridge.register_async_method("timer", |token, args| {
        let seconds = num_arg(args, 0, "timer")?;
        let message = args
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        pause(token, duration_from_secs(seconds, "timer")?)?;
        Ok(Value::from(timer_message(seconds, message)))
    });
}

fn pause(token: &CancellationToken, duration: Duration) -> std::result::Result<(), Cancelled> {
    if token.wait_timeout(duration) {
        return Err(Cancelled);
    }
    Ok(())
}

fn timer_message(seconds: f64, message: String) -> String {
    if message.is_empty() {
        format!("Timer completed after {:.2} seconds", seconds)
    } else {
        message
    }
}

fn duration_from_secs(seconds: f64, what: &str) -> Result<Duration> {
    if seconds < 0.0 {
        return Err(Error::invalid_argument(format!(
            "{} duration cannot be negative: {}",
            what, seconds
        )));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::invalid_argument(format!("{} duration {}: {}", what, seconds, e)))
}

fn num_arg(args: &[Value], index: usize, what: &str) -> std::result::Result<f64, TaskError> {
    args.get(index)
        .and_then(Value::as_num)
        .ok_or_else(|| format!("{} expects a number at argument {}", what, index).into())
}
