//! `sliceway.toml` server configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ServerResult;

/// Listener and connection settings.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides:
///
/// ```toml
/// host = "127.0.0.1"
/// port = 0
/// batch_bytes = 16384
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; `0` picks any free port.
    pub port: u16,
    /// Upper bound for coalescing ready chunks into one chunk-encoded write.
    pub batch_bytes: usize,
    /// Largest request head (request line plus headers) accepted.
    pub max_head_bytes: usize,
    /// Serve further requests on a connection after a clean response.
    pub keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            batch_bytes: 8 * 1024,
            max_head_bytes: 64 * 1024,
            keep_alive: true,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ServerResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `host:port` as passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
