//! Websocket transport to an Ensemble mesh broker.
//!
//! Owns a single persistent duplex connection. Outbound frames go through
//! an unbounded channel drained by the connection task; inbound text
//! frames are handed to a [`FrameHandler`] (normally the
//! [`CommandBroker`](crate::broker::CommandBroker)). Connectivity
//! transitions are published through a `watch` channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ensemble_api::transport::{Transport, TransportConfig};
//!
//! let transport = Transport::new(TransportConfig::default());
//! let endpoint = "ws://127.0.0.1:31075".parse()?;
//! transport.connect(&endpoint, Arc::new(|frame: &str| println!("{frame}"))).await?;
//! transport.send(r#"{"action":"ping"}"#.into())?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connectivity::{Connectivity, ConnectivityState};
use crate::error::Error;

// ── FrameHandler ─────────────────────────────────────────────────────

/// Receiver of decoded-to-text inbound frames.
///
/// Called on the connection task; implementations must not block.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle_frame(&self, frame: &str);
}

impl<F> FrameHandler for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn handle_frame(&self, frame: &str) {
        self(frame);
    }
}

// ── TransportConfig ──────────────────────────────────────────────────

/// Connection tuning for [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Grace delay before the connect attempt starts. Default: 100ms.
    pub connect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(100),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Handle to the mesh connection. Cheaply cloneable.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    config: TransportConfig,
    connectivity: Connectivity,
    /// Present only while the connection is open.
    outbound: ArcSwapOption<mpsc::UnboundedSender<String>>,
    /// Per-connection cancellation, child of `shutdown`.
    session: ArcSwapOption<CancellationToken>,
    shutdown: CancellationToken,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                connectivity: Connectivity::new(),
                outbound: ArcSwapOption::empty(),
                session: ArcSwapOption::empty(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open the connection.
    ///
    /// Resolves once the websocket handshake completes, or fails if the
    /// handshake errors out. Failures are also recorded in the
    /// connectivity state. There is no automatic retry.
    pub async fn connect(
        &self,
        endpoint: &Url,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<(), Error> {
        if self.is_connected() {
            tracing::debug!(endpoint = %endpoint, "Transport already connected");
            return Ok(());
        }

        let connectivity = &self.inner.connectivity;
        connectivity.connecting(endpoint.as_str());

        tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => {
                return Err(Error::Closed { reason: "transport shut down".into() });
            }
            () = tokio::time::sleep(self.inner.config.connect_delay) => {}
        }

        tracing::info!(endpoint = %endpoint, "Connecting to mesh broker");

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(endpoint.as_str()).await
        {
            Ok(ok) => ok,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(endpoint = %endpoint, error = %reason, "Mesh connect failed");
                connectivity.failed(&reason);
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    reason,
                });
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.inner.shutdown.child_token();
        self.inner.outbound.store(Some(Arc::new(tx)));
        self.inner.session.store(Some(Arc::new(session.clone())));
        connectivity.opened();
        tracing::info!("Mesh broker connected");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = run_connection(ws_stream, rx, handler.as_ref(), &session).await;
            inner.outbound.store(None);
            inner.session.store(None);
            match outcome {
                Ok(()) => inner.connectivity.closed(),
                Err(reason) => inner.connectivity.failed(&reason),
            }
            tracing::debug!("Mesh connection task exiting");
        });

        Ok(())
    }

    /// Queue a text frame for the open connection.
    ///
    /// Fails immediately with [`Error::NotConnected`] when no connection
    /// is open; nothing is buffered for later.
    pub fn send(&self, frame: String) -> Result<(), Error> {
        let guard = self.inner.outbound.load();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::NotConnected);
        };
        tx.send(frame).map_err(|_| Error::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.load().is_some()
    }

    /// Close the current connection, if any. The transport can connect again.
    pub fn close(&self) {
        if let Some(session) = self.inner.session.load_full() {
            session.cancel();
        }
    }

    /// Close the connection and refuse further connect attempts.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.connectivity.current()
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.connectivity.subscribe()
    }

    pub(crate) fn record_identity(&self, identity: &str) {
        self.inner.connectivity.identified(identity);
    }

    /// Install an in-memory outbound channel in place of a socket.
    #[cfg(test)]
    pub(crate) fn attach_channel(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.outbound.store(Some(Arc::new(tx)));
        self.inner.connectivity.opened();
        rx
    }

    #[cfg(test)]
    pub(crate) fn detach_channel(&self) {
        self.inner.outbound.store(None);
        self.inner.connectivity.closed();
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Pump frames in both directions until the connection ends.
///
/// Returns `Err(reason)` when the connection died on a socket error,
/// `Ok(())` on a clean close or cancellation.
async fn run_connection(
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    handler: &dyn FrameHandler,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                tracing::info!("Mesh connection closed locally");
                return Ok(());
            }
            Some(frame) = outbound.recv() => {
                tracing::debug!(bytes = frame.len(), "Sending frame");
                if let Err(e) = write.send(tungstenite::Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "Websocket write failed");
                    return Err(e.to_string());
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        tracing::debug!(bytes = text.len(), "Received frame");
                        handler.handle_frame(text.as_str());
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "Websocket close frame received"
                            );
                        } else {
                            tracing::info!("Websocket close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Websocket error");
                        return Err(e.to_string());
                    }
                    None => {
                        tracing::info!("Websocket stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_connect_delay() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_delay, Duration::from_millis(100));
    }

    #[test]
    fn send_without_connection_fails_immediately() {
        let transport = Transport::new(TransportConfig::default());
        let err = transport.send("{}".into()).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(!transport.connectivity().connected);
    }

    #[test]
    fn attached_channel_receives_frames() {
        let transport = Transport::new(TransportConfig::default());
        let mut rx = transport.attach_channel();
        assert!(transport.connectivity().connected);

        transport.send("hello".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        transport.detach_channel();
        assert!(transport.send("again".into()).is_err());
        assert!(!transport.connectivity().connected);
    }

    #[tokio::test]
    async fn connect_failure_is_recorded() {
        let transport = Transport::new(TransportConfig {
            connect_delay: Duration::ZERO,
        });
        // Port 9 (discard) on localhost is closed in any sane test environment.
        let endpoint: Url = "ws://127.0.0.1:9".parse().unwrap();
        let err = transport
            .connect(&endpoint, Arc::new(|_: &str| {}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connect { .. }));
        let state = transport.connectivity();
        assert!(!state.connected);
        assert!(state.error);
        assert_eq!(state.endpoint, endpoint.as_str());
        assert!(!state.error_message.is_empty());
    }
}
