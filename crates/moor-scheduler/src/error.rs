use thiserror::Error;
use tokio::sync::mpsc;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl<T> From<mpsc::error::SendError<T>> for SchedulerError {
    fn from(error: mpsc::error::SendError<T>) -> Self {
        SchedulerError::InternalError(error.to_string())
    }
}
