// src/lib.rs
pub mod config;
pub mod conn;
pub mod error;
pub mod file;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod reactor;
pub mod server;
pub mod signal;
pub mod slab;
pub mod syscalls;
pub mod timer;

// Re-exports for users
pub use config::Config;
pub use error::{EtudeError, EtudeResult};
pub use http::{Method, Status};
pub use metrics::{MetricsSnapshot, ReactorMetrics};
pub use parser::{ParseError, Request, RequestParser};
pub use reactor::Reactor;
pub use server::{Server, ServerConfig};
pub use signal::SignalSender;
pub use timer::{TimerId, TimerList};
