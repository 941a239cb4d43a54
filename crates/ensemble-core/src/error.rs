// ── Core error types ──
//
// Errors surfaced by the dashboard layer. Mesh-client failures are wrapped
// rather than re-exported so callers match on one enum.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Unknown widget kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("Invalid parameters for {kind} widget: {message}")]
    InvalidParams { kind: String, message: String },

    // ── Registry errors ──────────────────────────────────────────────
    #[error("No entity at index {index} (registry holds {len})")]
    EntityOutOfRange { index: usize, len: usize },

    #[error("Entity {index} is a {kind} widget and has no actions")]
    NotActionable { index: usize, kind: String },

    #[error("Entity {index} has no action {action} ({available} configured)")]
    ActionOutOfRange {
        index: usize,
        action: usize,
        available: usize,
    },

    // ── Mesh errors (wrapped) ────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] ensemble_api::Error),
}

impl CoreError {
    /// Returns `true` when the underlying cause is a connectivity problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_transient())
    }
}
