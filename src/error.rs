use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type a task returns from its closure.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("task failed: {0}")]
    Task(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("future was cancelled")]
    Cancelled,

    #[error("future not ready")]
    NotReady,

    #[error("future not found: {0}")]
    UnknownHandle(String),

    #[error("executor is shutting down")]
    ShuttingDown,

    #[error("async method not found: {0}")]
    UnknownMethod(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("already initialized")]
    AlreadyInitialized,
}

impl Error {
    pub fn task(err: TaskError) -> Self {
        Error::Task(Arc::from(err))
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn unknown_handle<S: ToString>(handle: S) -> Self {
        Error::UnknownHandle(handle.to_string())
    }

    /// True for failures produced by the task itself, panics included.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::Task(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Error::ShuttingDown)
    }

    /// Downcast the task's own error, if this is a task failure.
    pub fn task_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Task(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}
