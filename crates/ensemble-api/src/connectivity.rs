// ── Connectivity state ──
//
// Small observable cell describing the transport's link to the broker.
// Written only by the transport (and the broker for the identity field),
// read by the scheduler's gate and by UI consumers.

use serde::Serialize;
use tokio::sync::watch;

/// Point-in-time view of the connection to the mesh broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub connected: bool,
    pub endpoint: String,
    /// Address assigned to this client by the proxy; empty until announced.
    pub assigned_identity: String,
    pub error: bool,
    pub error_message: String,
}

/// Writable side of the connectivity state, shared by transport and broker.
#[derive(Debug)]
pub(crate) struct Connectivity {
    state: watch::Sender<ConnectivityState>,
}

impl Connectivity {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectivityState::default());
        Self { state }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    pub(crate) fn current(&self) -> ConnectivityState {
        self.state.borrow().clone()
    }

    pub(crate) fn connecting(&self, endpoint: &str) {
        self.state.send_modify(|s| {
            s.endpoint = endpoint.to_owned();
        });
    }

    pub(crate) fn opened(&self) {
        self.state.send_modify(|s| {
            s.connected = true;
            s.error = false;
            s.error_message.clear();
        });
    }

    /// The identity belongs to the session, so it goes with it.
    pub(crate) fn closed(&self) {
        self.state.send_modify(|s| {
            s.connected = false;
            s.assigned_identity.clear();
        });
    }

    pub(crate) fn failed(&self, message: &str) {
        self.state.send_modify(|s| {
            s.connected = false;
            s.assigned_identity.clear();
            s.error = true;
            message.clone_into(&mut s.error_message);
        });
    }

    pub(crate) fn identified(&self, identity: &str) {
        self.state.send_if_modified(|s| {
            if s.assigned_identity == identity {
                return false;
            }
            identity.clone_into(&mut s.assigned_identity);
            true
        });
    }
}
