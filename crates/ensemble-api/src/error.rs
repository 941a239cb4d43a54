use thiserror::Error;

/// Top-level error type for the `ensemble-api` crate.
///
/// Covers every failure mode of the mesh client: connection setup,
/// framing, and per-command outcomes. `ensemble-core` wraps these into
/// its own error type.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The websocket handshake failed or the connect attempt errored out.
    #[error("Cannot connect to mesh broker at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// An operation needed an open connection and there was none.
    /// Sends are never queued.
    #[error("Not connected")]
    NotConnected,

    /// The connection dropped while a write was in flight.
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    // ── Framing ─────────────────────────────────────────────────────
    /// An outgoing command could not be serialized.
    #[error("Failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame was not a valid command. The frame is dropped,
    /// the connection stays up.
    #[error("Failed to decode frame: {message}")]
    Decode { message: String, frame: String },

    // ── Command outcomes ────────────────────────────────────────────
    /// The mesh answered with `_exception`. This is a normal outcome,
    /// not a transport fault.
    #[error("Mesh exception in reply to '{action}'")]
    Exception {
        action: String,
        args: serde_json::Map<String, serde_json::Value>,
    },

    /// No reply arrived before the command's expiry instant.
    #[error("Command {id} expired without a reply")]
    Timeout { id: String },

    /// The broker shut down, or dropped the pending request, before it resolved.
    #[error("Request abandoned by broker")]
    Abandoned,
}

impl Error {
    /// Returns `true` for errors a later retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::NotConnected | Self::Closed { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the mesh reported an application-level failure.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// The `args` payload of an `_exception` reply, if this is one.
    pub fn exception_args(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Self::Exception { args, .. } => Some(args),
            _ => None,
        }
    }
}
