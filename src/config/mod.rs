pub mod env;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

// Re-export existing config types
pub use crate::upstream::UpstreamConfig;

/// Complete relay configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub nostr: NostrConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub info: InfoConfig,
}

/// Listener and static asset configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory served for non-protocol HTTP requests
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_bind() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

/// Event acceptance and storage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NostrConfig {
    /// Skip Schnorr verification (also disables upstream publishing)
    #[serde(default)]
    pub disable_signature: bool,
    /// Store capacity; oldest events are evicted first. Absent = unbounded.
    #[serde(default)]
    pub max_events: Option<usize>,
}

/// NIP-11 relay information
#[derive(Debug, Clone, Deserialize)]
pub struct InfoConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default = "default_supported_nips")]
    pub supported_nips: Vec<u32>,
    #[serde(default = "default_software")]
    pub software: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_name() -> String {
    "Peer Relay".to_string()
}

fn default_description() -> String {
    "In-memory Nostr relay bridged to upstream relays".to_string()
}

fn default_supported_nips() -> Vec<u32> {
    vec![1, 11]
}

fn default_software() -> String {
    "peer-relay".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: default_description(),
            pubkey: None,
            contact: None,
            supported_nips: default_supported_nips(),
            software: default_software(),
            version: default_version(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RelayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: RelayConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
