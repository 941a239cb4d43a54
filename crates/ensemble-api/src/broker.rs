//! Request/reply correlation over the mesh transport.
//!
//! [`CommandBroker::send`] stamps each outgoing command with a fresh
//! correlation id and parks a oneshot sender under that id. Inbound
//! `_reply` / `_exception` frames are matched by their `follows` field;
//! the pending entry is removed in the same step that resolves it, so
//! each request resolves at most once no matter how many duplicate or
//! late frames arrive. Completion order across ids is unconstrained.
//!
//! Entries whose expiry passes without an answer are rejected with
//! [`Error::Timeout`] by [`sweep_expired`](CommandBroker::sweep_expired),
//! which [`spawn_reaper`](CommandBroker::spawn_reaper) runs periodically.
//! [`shutdown`](CommandBroker::shutdown) fails whatever is still pending
//! with [`Error::Abandoned`], since no reply or sweep can follow it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connectivity::ConnectivityState;
use crate::error::Error;
use crate::transport::{FrameHandler, Transport, TransportConfig};
use crate::wire::{Args, Command, Inbound};

// ── BrokerConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub transport: TransportConfig,
    /// Lifetime stamped into each outgoing command's `expires`. Default: 60s.
    pub request_ttl: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            request_ttl: Duration::from_secs(60),
        }
    }
}

// ── Pending requests ─────────────────────────────────────────────────

struct PendingRequest {
    action: String,
    target: String,
    /// Seconds since the epoch, same as the wire `expires`.
    expires: i64,
    reply_tx: oneshot::Sender<Result<Command, Error>>,
}

impl PendingRequest {
    /// Whether the expiry instant lies strictly before `cutoff`.
    fn is_expired(&self, cutoff: i64) -> bool {
        self.expires < cutoff
    }
}

/// Awaitable completion of a single command.
///
/// Resolves with the `_reply` command, or fails with
/// [`Error::Exception`] / [`Error::Timeout`]. Dropping the handle does not
/// cancel the request; its entry stays until answered or reaped.
#[derive(Debug)]
pub struct ReplyHandle {
    id: String,
    rx: oneshot::Receiver<Result<Command, Error>>,
}

impl ReplyHandle {
    /// Correlation id of the command this handle waits on.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for ReplyHandle {
    type Output = Result<Command, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(Error::Abandoned)))
    }
}

// ── CommandBroker ────────────────────────────────────────────────────

/// Correlating mesh client. Cheaply cloneable via `Arc<BrokerInner>`.
#[derive(Clone)]
pub struct CommandBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    transport: Transport,
    request_ttl: chrono::Duration,
    pending: DashMap<String, PendingRequest>,
    /// Most recently announced identity.
    identity: ArcSwapOption<String>,
    /// First announced identity; set once, never overwritten.
    announced: watch::Sender<Option<String>>,
}

impl CommandBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let (announced, _) = watch::channel(None);
        let request_ttl = chrono::Duration::from_std(config.request_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        Self {
            inner: Arc::new(BrokerInner {
                transport: Transport::new(config.transport),
                request_ttl,
                pending: DashMap::new(),
                identity: ArcSwapOption::empty(),
                announced,
            }),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open the transport and route its inbound frames into this broker.
    pub async fn connect(&self, endpoint: &Url) -> Result<(), Error> {
        let router = InboundRouter(Arc::downgrade(&self.inner));
        self.inner.transport.connect(endpoint, Arc::new(router)).await
    }

    pub fn close(&self) {
        self.inner.transport.close();
    }

    /// Close for good and fail every pending request with [`Error::Abandoned`].
    pub fn shutdown(&self) {
        self.inner.transport.shutdown();
        self.abandon_pending();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.transport.connectivity()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.transport.subscribe_connectivity()
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Send a command and return a handle for its eventual reply.
    ///
    /// Fails immediately with [`Error::NotConnected`] when the transport is
    /// down. The pending entry is registered before the frame is written,
    /// so a reply can never arrive ahead of its registration.
    pub fn send(
        &self,
        target: &str,
        action: &str,
        args: Args,
    ) -> Result<ReplyHandle, Error> {
        if !self.inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        let expires_at = Utc::now()
            .checked_add_signed(self.inner.request_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let cmd = Command::request(target, action, args, expires_at);
        let frame = cmd.encode()?;

        let (reply_tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            cmd.id.clone(),
            PendingRequest {
                action: cmd.action.clone(),
                target: cmd.target.clone(),
                expires: cmd.expires,
                reply_tx,
            },
        );

        if let Err(e) = self.inner.transport.send(frame) {
            self.inner.pending.remove(&cmd.id);
            return Err(e);
        }

        tracing::debug!(id = %cmd.id, device = target, action, "Sent command");
        Ok(ReplyHandle { id: cmd.id, rx })
    }

    /// Send a command and wait for its reply.
    pub async fn request(&self, target: &str, action: &str, args: Args) -> Result<Command, Error> {
        self.send(target, action, args)?.await
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Handle one raw inbound frame.
    ///
    /// Undecodable frames are logged and dropped; they never take the
    /// connection down.
    pub fn receive(&self, frame: &str) {
        let cmd = match Command::decode(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match cmd.classify() {
            Inbound::Status {
                handler_name: Some(name),
            } => self.announce(name),
            Inbound::Status { handler_name: None } => {
                tracing::warn!("Status frame without handlerName, ignoring");
            }
            Inbound::Reply { follows, command } => {
                self.resolve(&follows, |_| Ok(command));
            }
            Inbound::Exception { follows, command } => {
                self.resolve(&follows, |pending| {
                    Err(Error::Exception {
                        action: pending.action.clone(),
                        args: command.args,
                    })
                });
            }
            Inbound::Unsolicited { follows, command } => {
                tracing::debug!(
                    follows = %follows,
                    action = %command.action,
                    "Correlated command with unhandled action, ignoring"
                );
            }
            Inbound::Orphan(command) => {
                tracing::debug!(
                    id = %command.id,
                    action = %command.action,
                    source = %command.source,
                    "Orphaned command received, ignoring"
                );
            }
        }
    }

    /// Remove the pending entry for `follows` and deliver its outcome.
    /// Missing entries (late or duplicate answers) are ignored.
    fn resolve(
        &self,
        follows: &str,
        outcome: impl FnOnce(&PendingRequest) -> Result<Command, Error>,
    ) {
        let Some((id, pending)) = self.inner.pending.remove(follows) else {
            tracing::debug!(follows, "No pending command for answer, discarding");
            return;
        };

        let result = outcome(&pending);
        tracing::debug!(
            id = %id,
            device = %pending.target,
            action = %pending.action,
            ok = result.is_ok(),
            "Command answered"
        );
        // Receiver gone means the caller stopped waiting; nothing to do.
        let _ = pending.reply_tx.send(result);
    }

    // ── Identity ─────────────────────────────────────────────────────

    fn announce(&self, name: String) {
        tracing::info!(identity = %name, "Received mesh proxy identity");
        self.inner.transport.record_identity(&name);
        self.inner.identity.store(Some(Arc::new(name.clone())));
        self.inner.announced.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(name);
            true
        });
    }

    /// The most recently announced identity, if any.
    pub fn identity(&self) -> Option<String> {
        self.inner.identity.load_full().map(|id| id.as_ref().clone())
    }

    /// Wait for the first identity announcement.
    ///
    /// Resolves immediately if one has already arrived; later
    /// announcements never change the value this returns.
    pub async fn announced_identity(&self) -> String {
        let mut rx = self.inner.announced.subscribe();
        loop {
            if let Some(name) = rx.borrow_and_update().clone() {
                return name;
            }
            // The sender lives in `self.inner`, so it cannot close while we hold `self`.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Reject and remove every pending command whose expiry is before `now`.
    ///
    /// Returns the number of commands reaped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp();
        let expired: Vec<String> = self
            .inner
            .pending
            .iter()
            .filter(|entry| entry.is_expired(cutoff))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in expired {
            if let Some((id, pending)) = self
                .inner
                .pending
                .remove_if(&id, |_, pending| pending.is_expired(cutoff))
            {
                tracing::debug!(id = %id, action = %pending.action, "Command expired");
                let _ = pending.reply_tx.send(Err(Error::Timeout { id }));
                reaped += 1;
            }
        }

        if reaped > 0 {
            tracing::info!(reaped, "Reaped expired commands");
        }
        reaped
    }

    fn abandon_pending(&self) -> usize {
        let ids: Vec<String> = self.inner.pending.iter().map(|e| e.key().clone()).collect();

        let mut abandoned = 0;
        for id in ids {
            if let Some((id, pending)) = self.inner.pending.remove(&id) {
                tracing::debug!(id = %id, action = %pending.action, "Command abandoned");
                let _ = pending.reply_tx.send(Err(Error::Abandoned));
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            tracing::info!(abandoned, "Abandoned pending commands on shutdown");
        }
        abandoned
    }

    /// Spawn a task that calls [`sweep_expired`](Self::sweep_expired) every `period`.
    pub fn spawn_reaper(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        broker.sweep_expired(Utc::now());
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &Transport {
        &self.inner.transport
    }
}

impl FrameHandler for CommandBroker {
    fn handle_frame(&self, frame: &str) {
        self.receive(frame);
    }
}

/// Frame handler held by the connection task. Weak so the task does not
/// keep a dropped broker alive.
struct InboundRouter(Weak<BrokerInner>);

impl FrameHandler for InboundRouter {
    fn handle_frame(&self, frame: &str) {
        if let Some(inner) = self.0.upgrade() {
            CommandBroker { inner }.receive(frame);
        }
    }
}
