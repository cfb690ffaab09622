//! The tool-server document.
//!
//! ```json
//! {
//!   "servers": [
//!     { "name": "nmap", "params": { "command": "npx", "args": ["-y", "nmap-mcp"], "env": {} },
//!       "cacheToolsList": true },
//!     { "name": "burp", "url": "http://127.0.0.1:9876/sse" }
//!   ]
//! }
//! ```
//!
//! An entry with `params` is process-backed, one with `url` is a remote
//! endpoint. Entries are parsed one at a time so a malformed entry only
//! removes itself.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// How to reach a tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSpec {
    /// Spawn a child process and talk over its stdin/stdout.
    Process {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Connect to an event-stream endpoint.
    Remote { url: String },
}

/// One configured tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportSpec,
    pub cache_tools_list: bool,
}

#[derive(Debug, Deserialize)]
struct ServersDocument {
    #[serde(default)]
    servers: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    params: Option<RawParams>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_cache", alias = "cacheToolsList")]
    cache_tools_list: bool,
}

#[derive(Debug, Deserialize)]
struct RawParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

fn default_cache() -> bool {
    true
}

impl TryFrom<RawEntry> for ServerDescriptor {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        if raw.name.trim().is_empty() {
            return Err("server name must not be empty".into());
        }

        let transport = match (raw.params, raw.url) {
            (Some(params), _) => {
                if params.command.trim().is_empty() {
                    return Err(format!("server '{}' has an empty command", raw.name));
                }
                TransportSpec::Process {
                    command: params.command,
                    args: params.args,
                    env: params.env,
                }
            }
            (None, Some(url)) if !url.trim().is_empty() => TransportSpec::Remote { url },
            _ => return Err(format!("server '{}' has neither params nor url", raw.name)),
        };

        Ok(Self {
            name: raw.name,
            transport,
            cache_tools_list: raw.cache_tools_list,
        })
    }
}

/// Parse a tool-server document, skipping malformed entries.
pub fn parse_servers(content: &str, origin: &Path) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let document: ServersDocument =
        serde_json::from_str(content).map_err(|e| ConfigError::ServersError {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut descriptors = Vec::with_capacity(document.servers.len());
    for (index, value) in document.servers.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawEntry>(value)
            .map_err(|e| e.to_string())
            .and_then(ServerDescriptor::try_from);

        match parsed {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(reason) => warn!(entry = index, %reason, "Skipping malformed tool server entry"),
        }
    }

    Ok(descriptors)
}

/// Load the tool-server document. A missing file means no tool providers.
pub fn load_servers(path: &Path) -> Result<Vec<ServerDescriptor>, ConfigError> {
    if !path.exists() {
        info!("No tool server file at {}, running without tools", path.display());
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ServersError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    parse_servers(&content, path)
}
