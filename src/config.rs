#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::scan::ChannelPath;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub excluded_sequences: HashMap<String, Vec<SequenceSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_tick_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            poll_interval_secs: default_poll_interval_secs(),
            tick_timeout_secs: default_tick_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: String,
    #[serde(default)]
    pub rest_endpoints: Vec<String>,
    #[serde(default)]
    pub home_chain: bool,
    #[serde(default = "default_state_refresh_interval_secs")]
    pub state_refresh_interval_secs: u64,
    #[serde(default)]
    pub whitelist_clients: Vec<String>,
    #[serde(default)]
    pub blacklist_clients: Vec<String>,
    #[serde(default)]
    pub whitelist_connections: Vec<String>,
    #[serde(default)]
    pub blacklist_connections: Vec<String>,
    #[serde(default)]
    pub whitelist_channels: Vec<String>,
    #[serde(default)]
    pub blacklist_channels: Vec<String>,
    /// Static channel list; when non-empty, channel discovery is skipped.
    #[serde(default)]
    pub channels: Vec<ChannelPath>,
}

fn default_state_refresh_interval_secs() -> u64 {
    1800
}

/// A single excluded sequence, or an inclusive `"start-end"` range.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SequenceSpec {
    Single(u64),
    Range(String),
}

pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading config file: {}", path.display()))?;
    let parsed: toml::Value = toml::from_str(&raw)
        .with_context(|| format!("failed parsing config toml: {}", path.display()))?;
    let resolved = resolve_env_refs(parsed)?;
    let cfg: MonitorConfig = resolved
        .try_into()
        .with_context(|| format!("failed decoding config: {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve `env:VAR` string values anywhere in the config tree.
fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value> {
    fn walk(v: &mut toml::Value) -> Result<()> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        bail!("invalid env: reference (empty var name)");
                    }
                    let val = std::env::var(var)
                        .with_context(|| format!("missing required environment variable: {var}"))?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("at least one chain must be configured");
        }
        let home = self.chains.iter().filter(|c| c.home_chain).count();
        if home != 1 {
            bail!("exactly one chain must set home_chain = true (found {home})");
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for chain in &self.chains {
            if chain.chain_id.trim().is_empty() {
                bail!("chain {} has an empty chain_id", chain.name);
            }
            if !seen.insert(chain.chain_id.as_str()) {
                bail!("duplicate chain_id: {}", chain.chain_id);
            }
            if chain.rest_endpoints.is_empty() {
                bail!("chain {} has no rest_endpoints", chain.chain_id);
            }
        }
        if self.exporter.poll_interval_secs == 0 {
            bail!("exporter.poll_interval_secs must be > 0");
        }
        if self.exporter.tick_timeout_secs == 0 {
            bail!("exporter.tick_timeout_secs must be > 0");
        }
        Ok(())
    }

    /// Chain ids this chain's light clients are matched against during
    /// discovery: everything else for the home chain, the home chain for
    /// everything else.
    pub fn counterparty_chain_ids(&self, chain: &ChainConfig) -> Vec<String> {
        if chain.home_chain {
            self.chains
                .iter()
                .filter(|c| !c.home_chain)
                .map(|c| c.chain_id.clone())
                .collect()
        } else {
            self.chains
                .iter()
                .filter(|c| c.home_chain)
                .map(|c| c.chain_id.clone())
                .collect()
        }
    }
}
