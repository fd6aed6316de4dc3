//! Connection configuration.
//!
//! Defaults match the protocol's historical settings. A config can be read
//! from JSON and then overlaid with `DSTORE_*` environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dstore_core::tokens;
use dstore_store::{DataStore, StoreConfig};
use dstore_sync::{GeneratorConfig, KeepAliveConfig};

use crate::error::{DStoreError, Result};

/// Everything that shapes one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub generator: GeneratorConfig,
    pub keep_alive: KeepAliveConfig,
    pub store: StoreConfig,
    /// Levels below each root sent by `send_document`.
    pub document_depth: u32,
    /// Levels below a command node sent when it is issued.
    pub command_depth: u32,
    /// How long `wait_for_status` waits.
    pub command_timeout: Duration,
    /// Directory the default file sink writes under.
    pub file_root: PathBuf,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            store: StoreConfig::default(),
            document_depth: tokens::DEFAULT_DEPTH as u32,
            command_depth: 3,
            command_timeout: Duration::from_secs(60),
            file_root: PathBuf::from("."),
        }
    }
}

/// Environment variables read by [`ConnectionConfig::from_env`].
pub mod env {
    pub const KEEPALIVE_ENABLED: &str = "DSTORE_KEEPALIVE_ENABLED";
    /// Milliseconds.
    pub const KEEPALIVE_RESPONSE_TIMEOUT: &str = "DSTORE_KEEPALIVE_RESPONSE_TIMEOUT";
    /// Milliseconds of idle input before a probe.
    pub const SOCKET_READ_TIMEOUT: &str = "DSTORE_SOCKET_READ_TIMEOUT";
    pub const SPIRIT_ON: &str = "DSTORE_SPIRIT_ON";
    /// Seconds.
    pub const SPIRIT_EXPIRY_TIME: &str = "DSTORE_SPIRIT_EXPIRY_TIME";
}

impl ConnectionConfig {
    /// Decode a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|var| std::env::var(var).ok())
    }

    /// Overlay values from `lookup`, keyed by the names in [`env`].
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(env::KEEPALIVE_ENABLED) {
            self.keep_alive.enabled = parse_bool(env::KEEPALIVE_ENABLED, &v)?;
        }
        if let Some(v) = lookup(env::KEEPALIVE_RESPONSE_TIMEOUT) {
            self.keep_alive.response_timeout =
                Duration::from_millis(parse_u64(env::KEEPALIVE_RESPONSE_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(env::SOCKET_READ_TIMEOUT) {
            self.keep_alive.probe_interval =
                Duration::from_millis(parse_u64(env::SOCKET_READ_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(env::SPIRIT_ON) {
            self.store.spirit_enabled = parse_bool(env::SPIRIT_ON, &v)?;
        }
        if let Some(v) = lookup(env::SPIRIT_EXPIRY_TIME) {
            self.store.spirit_expiry =
                Duration::from_secs(parse_u64(env::SPIRIT_EXPIRY_TIME, &v)?);
        }
        Ok(self)
    }

    /// A fresh store built from the `store` section.
    pub fn build_store(&self) -> Arc<DataStore> {
        Arc::new(DataStore::new(self.store.clone()))
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(DStoreError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| DStoreError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}
