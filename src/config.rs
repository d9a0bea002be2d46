//! Server configuration.
//!
//! Values come from an optional TOML file, then CLI flags override them.
//! Every field has a default, so an empty or missing file is valid.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// chunkd configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listening socket binds to
    pub listen_addr: SocketAddr,

    /// Directory requested filenames are resolved against
    pub root: PathBuf,

    /// Number of general-purpose connection slots
    pub max_connections: usize,

    /// Listen backlog
    pub backlog: i32,

    /// Bytes read from disk and sent per transfer chunk
    pub chunk_size: usize,

    /// Maximum length of `<root>/<filename>` in bytes
    pub max_path_len: usize,

    /// Close connections with no successful read or send for this long
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 12345)),
            root: PathBuf::from("./file_storage"),
            max_connections: 3,
            backlog: 5,
            chunk_size: 32,
            max_path_len: 64,
            idle_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config {
            message: format!("Failed to parse config: {}", e),
        })
    }

    /// Reject values the dispatch loop cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::Config {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be at least 1".to_string(),
            });
        }
        if self.backlog <= 0 {
            return Err(Error::Config {
                message: "backlog must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
