//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ensemble_config::ConfigError;
use ensemble_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const REMOTE: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to mesh broker at {url}: {reason}")]
    #[diagnostic(
        code(ensemble::connection_failed),
        help(
            "Check that the mesh broker is running and reachable.\n\
             URL: {url}\n\
             Override it with --endpoint or ENSEMBLE_ENDPOINT."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected to the mesh broker")]
    #[diagnostic(
        code(ensemble::disconnected),
        help("The connection dropped. Retry, or enable [reconnect] in the config file.")
    )]
    Disconnected,

    // ── Mesh outcomes ────────────────────────────────────────────────

    #[error("Mesh reported an exception for '{action}'")]
    #[diagnostic(code(ensemble::exception), help("Exception payload: {args}"))]
    Exception { action: String, args: String },

    #[error("Command {id} expired without a reply")]
    #[diagnostic(
        code(ensemble::expired),
        help("The mesh never answered. Check that the target device is online.")
    )]
    Expired { id: String },

    #[error("No reply within {seconds}s")]
    #[diagnostic(
        code(ensemble::timeout),
        help("Increase the wait with --wait or check that the target device is online.")
    )]
    Timeout { seconds: u64 },

    // ── Widgets ──────────────────────────────────────────────────────

    #[error("{message}")]
    #[diagnostic(
        code(ensemble::widget),
        help("Run: ensemble-dash widgets to review the configured widgets")
    )]
    Widget { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ensemble::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(ensemble::config),
        help("Run: ensemble-dash config path to locate the config file")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(ensemble::json))]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::Timeout { .. } | Self::Expired { .. } => exit_code::TIMEOUT,
            Self::Exception { .. } => exit_code::REMOTE,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Widget { .. } => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Api(api) => api.into(),

            CoreError::UnknownKind { .. }
            | CoreError::InvalidParams { .. }
            | CoreError::EntityOutOfRange { .. }
            | CoreError::NotActionable { .. }
            | CoreError::ActionOutOfRange { .. } => CliError::Widget {
                message: err.to_string(),
            },
        }
    }
}

impl From<ensemble_core::ApiError> for CliError {
    fn from(err: ensemble_core::ApiError) -> Self {
        use ensemble_core::ApiError;

        match err {
            ApiError::Connect { endpoint, reason } => CliError::ConnectionFailed {
                url: endpoint,
                reason,
            },
            ApiError::NotConnected | ApiError::Closed { .. } => CliError::Disconnected,
            ApiError::Exception { action, args } => CliError::Exception {
                action,
                args: serde_json::Value::Object(args).to_string(),
            },
            ApiError::Timeout { id } => CliError::Expired { id },
            other => CliError::Internal(other.to_string()),
        }
    }
}
