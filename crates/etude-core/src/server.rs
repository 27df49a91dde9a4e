// src/server.rs
use crate::config::{Config, DEFAULT_TIMESLOT_SECS, MAX_CONNECTIONS};
use crate::error::EtudeResult;
use crate::reactor::Reactor;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::warn;

/// Everything the reactor needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub doc_root: PathBuf,
    pub timeslot_secs: u32,
    pub max_connections: usize,
}

/// Builder for a static file server.
///
/// ```no_run
/// use etude_core::Server;
///
/// Server::init(9006).doc_root("./root").timeslot(5).start()?;
/// # Ok::<(), etude_core::EtudeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// All interfaces on `port`, document root `./root`.
    pub fn init(port: u16) -> Self {
        Self {
            config: ServerConfig {
                addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                doc_root: PathBuf::from("./root"),
                timeslot_secs: DEFAULT_TIMESLOT_SECS,
                max_connections: MAX_CONNECTIONS,
            },
        }
    }

    pub fn from_config(config: &Config) -> EtudeResult<Self> {
        Ok(Self {
            config: ServerConfig {
                addr: config.server_addr()?,
                doc_root: config.doc_root.clone(),
                timeslot_secs: config.timeslot_secs,
                max_connections: MAX_CONNECTIONS,
            },
        })
    }

    pub fn host(mut self, host: impl Into<std::net::IpAddr>) -> Self {
        self.config.addr.set_ip(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.addr.set_port(port);
        self
    }

    pub fn doc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.doc_root = root.into();
        self
    }

    /// Alarm period in seconds. Idle connections live for three of these.
    pub fn timeslot(mut self, secs: u32) -> Self {
        self.config.timeslot_secs = secs;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and prepare the reactor without entering the loop.
    pub fn listen(&self) -> EtudeResult<Reactor> {
        if !self.config.doc_root.is_dir() {
            warn!(doc_root = %self.config.doc_root.display(), "document root is not a directory");
        }
        Reactor::listen(&self.config)
    }

    /// Listen and serve until stopped.
    pub fn start(&self) -> EtudeResult<()> {
        self.listen()?.run()
    }
}
