//! Shared configuration for the Ensemble dashboard.
//!
//! A TOML file (platform config dir, or an explicit path) layered over
//! built-in defaults and `ENSEMBLE_`-prefixed environment variables, and
//! translation to `ensemble_core::DashboardConfig`. Nothing here ever
//! writes the file back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use ensemble_core::{DEFAULT_ENDPOINT, DashboardConfig, ReconnectConfig, WidgetConfig};

/// Prefix for environment overrides. Nested keys use `__`,
/// e.g. `ENSEMBLE_RECONNECT__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "ENSEMBLE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Mesh broker websocket URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Grace delay before each connect attempt, in milliseconds.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,

    /// Refresh scheduler tick, in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Lifetime of outgoing commands, in seconds.
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,

    /// Expired-request sweep period, in seconds.
    #[serde(default = "default_reaper_secs")]
    pub reaper_secs: u64,

    /// Present = reconnect automatically after the connection drops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,

    /// Widgets in display order.
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_delay_ms: default_connect_delay_ms(),
            tick_secs: default_tick_secs(),
            request_ttl_secs: default_request_ttl_secs(),
            reaper_secs: default_reaper_secs(),
            reconnect: None,
            widgets: Vec::new(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}
fn default_connect_delay_ms() -> u64 {
    100
}
fn default_tick_secs() -> u64 {
    5
}
fn default_request_ttl_secs() -> u64 {
    60
}
fn default_reaper_secs() -> u64 {
    5
}

/// `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Reconnect {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Omit to retry forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

/// A `[[widgets]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Widget {
    /// Adapter kind, e.g. `contextview` or `actionbutton`.
    pub kind: String,

    /// Refresh interval in seconds; 0 never refreshes.
    #[serde(default)]
    pub refresh: u64,

    /// Adapter parameters, passed through untouched.
    #[serde(default)]
    pub params: Map<String, Value>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "ensemble", "ensemble-dash").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ensemble-dash");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults overlaid with the TOML file at `path` (missing file = no-op).
fn file_layers(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
}

/// The full provider stack: defaults, then `path`, then the environment.
pub fn figment(path: &Path) -> Figment {
    file_layers(path).merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from file + environment.
///
/// `path` overrides the platform config location.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Render as TOML, as `config show` prints it.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate and convert into the runtime dashboard configuration.
    pub fn to_dashboard_config(&self) -> Result<DashboardConfig, ConfigError> {
        let endpoint = parse_endpoint(&self.endpoint)?;

        let mut config = DashboardConfig::new(endpoint);
        config.connect_delay = Duration::from_millis(self.connect_delay_ms);
        config.tick_period = positive_secs("tick_secs", self.tick_secs)?;
        config.request_ttl = positive_secs("request_ttl_secs", self.request_ttl_secs)?;
        config.reaper_period = positive_secs("reaper_secs", self.reaper_secs)?;
        config.reconnect = self.reconnect.as_ref().map(Reconnect::to_runtime).transpose()?;
        config.widgets = self
            .widgets
            .iter()
            .enumerate()
            .map(|(i, w)| w.to_runtime(i))
            .collect::<Result<_, _>>()?;

        Ok(config)
    }
}

impl Reconnect {
    fn to_runtime(&self) -> Result<ReconnectConfig, ConfigError> {
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::invalid(
                "reconnect.max_delay_ms",
                format!(
                    "must be at least initial_delay_ms ({})",
                    self.initial_delay_ms
                ),
            ));
        }
        Ok(ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        })
    }
}

impl Widget {
    fn to_runtime(&self, index: usize) -> Result<WidgetConfig, ConfigError> {
        let kind = self.kind.trim();
        if kind.is_empty() {
            return Err(ConfigError::invalid(
                format!("widgets[{index}].kind"),
                "must not be empty",
            ));
        }
        Ok(WidgetConfig::new(
            kind,
            self.refresh,
            Value::Object(self.params.clone()),
        ))
    }
}

/// Parse a broker endpoint, accepting only websocket schemes.
pub fn parse_endpoint(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw
        .parse()
        .map_err(|e| ConfigError::invalid("endpoint", format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::invalid(
            "endpoint",
            format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
        )),
    }
}

/// Upper bound for every `*_secs` setting: one day.
const MAX_SECS: u64 = 86_400;

fn positive_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    if secs > MAX_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {MAX_SECS} seconds"),
        ));
    }
    Ok(Duration::from_secs(secs))
}
