//! CLI argument definitions using clap
//!
//! Flags override values loaded from the config file; every flag can also
//! be supplied through a `CHUNKD_*` environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::ServerConfig;
use crate::error::Error;

/// Chunked file download daemon
#[derive(Parser, Debug)]
#[command(name = "chunkd")]
#[command(about = "Serve files over a tiny binary protocol, one chunk per readiness event")]
#[command(version)]
pub struct Cli {
    /// TOML config file (missing file means defaults)
    #[arg(short, long, env = "CHUNKD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "CHUNKD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Directory to serve files from
    #[arg(short, long, env = "CHUNKD_ROOT")]
    pub root: Option<PathBuf>,

    /// Maximum simultaneous client connections
    #[arg(long, env = "CHUNKD_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Bytes sent per chunk
    #[arg(long, env = "CHUNKD_CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    /// Close connections idle for this many seconds
    #[arg(long, env = "CHUNKD_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the effective configuration: file first, then flags.
    pub fn server_config(&self) -> Result<ServerConfig, Error> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_from(path)?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(chunk) = self.chunk_size {
            config.chunk_size = chunk;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Default tracing directive for the chosen verbosity
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "chunkd=info",
            1 => "chunkd=debug",
            _ => "chunkd=trace",
        }
    }
}
