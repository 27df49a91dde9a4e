use anyhow::Context;
use clap::Parser;
use etude_core::{Config, Server, logging};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Serve static files from a document root over HTTP/1.1.
///
/// Unset flags fall back to the ETUDE_* environment variables (and `.env`),
/// then to the config file.
#[derive(Parser, Debug)]
#[command(name = "etude")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory files are served from
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Alarm period in seconds; idle connections close after three periods
    #[arg(short, long)]
    timeslot: Option<u32>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.doc_root = root;
        }
        if let Some(timeslot) = self.timeslot {
            config.timeslot_secs = timeslot;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.json_logs {
            config.log_format = "json".to_string();
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("cannot load configuration")?;
    let config = cli.apply(config);
    logging::init_from_config(&config);

    let result = run(&config);
    if let Err(e) = &result {
        error!(error = %e, "server failed");
    }
    result
}

fn run(config: &Config) -> anyhow::Result<()> {
    let server = Server::from_config(config).context("invalid server configuration")?;
    let mut reactor = server
        .listen()
        .with_context(|| format!("cannot listen on {}:{}", config.host, config.port))?;

    let stop = reactor.stop_handle()?;
    ctrlc::set_handler(move || {
        info!("received Ctrl-C, shutting down");
        let _ = stop.stop();
    })
    .context("cannot install Ctrl-C handler")?;

    reactor.run()?;
    info!(metrics = ?reactor.metrics().snapshot(), "etude shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "etude",
            "--port",
            "8080",
            "--root",
            "/srv/www",
            "--json-logs",
        ]);
        assert!(cli.config.is_none());
        let config = cli.apply(Config::default());
        assert_eq!(config.port, 8080);
        assert_eq!(config.doc_root, PathBuf::from("/srv/www"));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.timeslot_secs, 5);
        assert!(config.is_json_logs());
    }

    #[test]
    fn test_config_file_flag() {
        let cli = Cli::parse_from(["etude", "-c", "/etc/etude.toml", "-t", "2"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/etude.toml")));
        let config = cli.apply(Config::default());
        assert_eq!(config.timeslot_secs, 2);
    }
}
