// src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// `acquire` was called before `init`.
    #[error("Pool is not initialized")]
    NotInitialized,

    #[error("Pool is already initialized")]
    AlreadyInitialized,

    /// The pool was destroyed while waiting or before the call.
    #[error("Pool is closed")]
    Closed,

    #[error("Timed out waiting for a free handle")]
    Timeout,

    #[error("Invalid pool URL: {0}")]
    InvalidUrl(String),

    /// The connector failed to open a handle.
    #[error("Connect error: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type PoolResult<T> = Result<T, PoolError>;
