use crate::error::{Error, Result};
use crate::executor::PanicStrategy;

/// Worker count used when none (or zero) is configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Queue slots per worker.
pub const DEFAULT_QUEUE_CAPACITY_FACTOR: usize = 10;

const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: Option<usize>,
    pub queue_capacity_factor: usize,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub panic_strategy: PanicStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: None,
            queue_capacity_factor: DEFAULT_QUEUE_CAPACITY_FACTOR,
            thread_name_prefix: "kairos-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_workers {
            if n > MAX_WORKERS {
                return Err(Error::config(format!(
                    "num_workers too large (max {})",
                    MAX_WORKERS
                )));
            }
        }

        if self.queue_capacity_factor == 0 {
            return Err(Error::config("queue_capacity_factor must be > 0"));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    /// Effective worker count. Unset or zero falls back to [`DEFAULT_WORKERS`].
    pub fn worker_threads(&self) -> usize {
        match self.num_workers {
            Some(n) if n > 0 => n,
            _ => DEFAULT_WORKERS,
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.worker_threads()
            .saturating_mul(self.queue_capacity_factor)
            .max(1)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.config.num_workers = Some(n);
        self
    }

    pub fn queue_capacity_factor(mut self, factor: usize) -> Self {
        self.config.queue_capacity_factor = factor;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workers() {
        let config = Config::default();
        assert_eq!(config.worker_threads(), DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity(), DEFAULT_WORKERS * DEFAULT_QUEUE_CAPACITY_FACTOR);
    }

    #[test]
    fn test_zero_workers_falls_back() {
        let config = Config::builder().num_workers(0).build().unwrap();
        assert_eq!(config.worker_threads(), DEFAULT_WORKERS);
    }

    #[test]
    fn test_validation() {
        assert!(Config::builder().num_workers(2048).build().is_err());
        assert!(Config::builder().queue_capacity_factor(0).build().is_err());
        assert!(Config::builder().thread_name_prefix("").build().is_err());

        let config = Config::builder()
            .num_workers(3)
            .queue_capacity_factor(2)
            .build()
            .unwrap();
        assert_eq!(config.queue_capacity(), 6);
    }
}
