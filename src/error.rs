//! Error types for radish.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Backend unreachable or a command failed. Propagates immediately;
    /// recovery is the caller's responsibility, no internal retry.
    #[error("connection error: {0}")]
    Connection(#[from] redis::RedisError),

    /// A job handler failed. Isolated per task and routed to the worker's
    /// error callback; never crosses the task boundary.
    #[error("job handler error: {0}")]
    Handler(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not authorized: {0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
