// ── Runtime dashboard configuration ──
//
// These types describe *what* the dashboard polls and *how* it talks to
// the mesh. They never touch disk: the CLI (via ensemble-config) builds a
// `DashboardConfig` and hands it in.

use std::time::Duration;

use serde_json::Value;
use url::Url;

/// Default mesh broker endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:31075";

/// One widget declaration: which adapter refreshes it, how often, and
/// with what parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetConfig {
    /// Adapter kind, matched case-insensitively (e.g. `contextview`).
    pub kind: String,
    /// Refresh interval in seconds. 0 = never auto-refresh.
    pub refresh_secs: u64,
    /// Free-form adapter parameters.
    pub params: Value,
}

impl WidgetConfig {
    pub fn new(kind: impl Into<String>, refresh_secs: u64, params: Value) -> Self {
        Self {
            kind: kind.into(),
            refresh_secs,
            params,
        }
    }

    /// Display title from `params.title`, if any.
    pub fn title(&self) -> Option<&str> {
        self.params.get("title").and_then(Value::as_str)
    }
}

/// Exponential backoff for re-establishing a dropped mesh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before reconnect attempt number `attempt` (0-based).
    ///
    /// Doubles per attempt up to `max_delay`, then spreads by up to ±25%
    /// with a deterministic jitter seeded from the attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (capped * jitter_factor).max(0.0);

        Duration::from_secs_f64(with_jitter)
    }
}

/// Everything the [`Dashboard`](crate::Dashboard) needs to run.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Mesh broker websocket endpoint.
    pub endpoint: Url,
    /// Grace delay before each connect attempt.
    pub connect_delay: Duration,
    /// Scheduler tick period.
    pub tick_period: Duration,
    /// Lifetime stamped into each outgoing command.
    pub request_ttl: Duration,
    /// How often expired pending commands are swept.
    pub reaper_period: Duration,
    /// `None` disables automatic reconnection.
    pub reconnect: Option<ReconnectConfig>,
    /// Widgets in display order. Fixed for the dashboard's lifetime.
    pub widgets: Vec<WidgetConfig>,
}

impl DashboardConfig {
    /// Config for `endpoint` with default timings, no reconnect and no widgets.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            connect_delay: Duration::from_millis(100),
            tick_period: Duration::from_secs(5),
            request_ttl: Duration::from_secs(60),
            reaper_period: Duration::from_secs(5),
            reconnect: None,
            widgets: Vec::new(),
        }
    }
}
