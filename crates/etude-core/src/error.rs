// src/error.rs
use std::io;
use thiserror::Error;

/// Central error type for the etude server core.
///
/// Would-block is never an error here: the syscall wrappers report it as
/// `Ok(None)` so the reactor can yield back to the readiness wait.
#[derive(Debug, Error)]
pub enum EtudeError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A response header did not fit into the write buffer.
    #[error("Response does not fit into the write buffer")]
    ResponseOverflow,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type EtudeResult<T> = Result<T, EtudeError>;
