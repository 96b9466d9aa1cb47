//! Daemon configuration
//!
//! Values come from three layers, highest first: command line (or its
//! environment variables), the TOML file given with `--config`, built-in
//! defaults.

use anyhow::{bail, Context, Result};
use flood_core::SiteId;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7420;
pub const DEFAULT_TITLE: &str = "untitled";
pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RELAY_SWEEP_SECS: u64 = 5;

/// One configuration layer. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub site: Option<String>,
    pub alias: Option<String>,
    pub title: Option<String>,
    pub join: Option<String>,
    pub relay_timeout: Option<u64>,
    pub relay_sweep: Option<u64>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Overlay `other` on top of `self`
    pub fn merge_with(mut self, other: Config) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        overlay!(bind, port, site, alias, title, join, relay_timeout, relay_sweep, log_level);
        self
    }
}

/// Fully resolved daemon settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    /// Explicit site id. Defaults to the bound listen address.
    pub site: Option<SiteId>,
    pub alias: String,
    pub title: String,
    pub join: Option<SiteId>,
    pub relay_timeout: Duration,
    pub relay_sweep: Duration,
    pub log_level: Level,
}

impl Settings {
    pub fn resolve(config: Config) -> Result<Self> {
        let site = config
            .site
            .map(SiteId::new)
            .transpose()
            .context("invalid site id")?;
        let join = config
            .join
            .map(SiteId::new)
            .transpose()
            .context("invalid join address")?;

        let relay_timeout = config.relay_timeout.unwrap_or(DEFAULT_RELAY_TIMEOUT_SECS);
        let relay_sweep = config.relay_sweep.unwrap_or(DEFAULT_RELAY_SWEEP_SECS);
        if relay_sweep == 0 {
            bail!("relay sweep interval must be at least one second");
        }

        Ok(Self {
            bind: config.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: config.port.unwrap_or(DEFAULT_PORT),
            site,
            alias: config.alias.unwrap_or_else(default_alias),
            title: config.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            join,
            relay_timeout: Duration::from_secs(relay_timeout),
            relay_sweep: Duration::from_secs(relay_sweep),
            log_level: parse_level(config.log_level.as_deref().unwrap_or("info")),
        })
    }
}

fn default_alias() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("user-{}", &id[..8])
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
