//! Fixed-size pool of blocking resource handles (typically database
//! connections).
//!
//! Handles are opened once by [`Pool::init`] and lent out through
//! [`Pooled`] guards that put them back on drop, so a borrowed handle is
//! returned on every exit path of the borrowing code.

pub mod error;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use pool::{Pool, PoolConfig, Pooled};
