// ── Dashboard ──
//
// Owns the mesh client, the entity registry and the background tasks
// (refresh scheduler, expiry reaper, optional reconnect supervisor) for
// one configured set of widgets.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use ensemble_api::{
    Args, BrokerConfig, Command, CommandBroker, ConnectivityState, ReplyHandle, TransportConfig,
};

use crate::adapter::{ActionButtonAdapter, ActionButtonParams, AdapterRegistry, RefreshAdapter};
use crate::config::{DashboardConfig, ReconnectConfig};
use crate::error::CoreError;
use crate::model::EntityDescriptor;
use crate::scheduler::RefreshScheduler;
use crate::store::EntityRegistry;
use crate::stream::EntityStream;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<DashboardInner>`. Does not connect until
/// [`start()`](Self::start) is called.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<DashboardInner>,
}

struct DashboardInner {
    config: DashboardConfig,
    broker: CommandBroker,
    registry: Arc<EntityRegistry>,
    adapters: AdapterRegistry,
    /// Taken by `start()`.
    scheduler: Mutex<Option<RefreshScheduler>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dashboard {
    /// Build a dashboard with the built-in widget adapters.
    pub fn new(config: DashboardConfig) -> Result<Self, CoreError> {
        Self::with_adapters(config, AdapterRegistry::builtin())
    }

    /// Build a dashboard with a custom adapter set.
    ///
    /// Every configured widget must resolve to an adapter and pass its
    /// parameter validation.
    pub fn with_adapters(
        config: DashboardConfig,
        adapters: AdapterRegistry,
    ) -> Result<Self, CoreError> {
        let broker = CommandBroker::new(BrokerConfig {
            transport: TransportConfig {
                connect_delay: config.connect_delay,
            },
            request_ttl: config.request_ttl,
        });
        let registry = Arc::new(EntityRegistry::new(
            config.widgets.iter().map(EntityDescriptor::from),
        ));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&registry),
            &adapters,
            broker.clone(),
            broker.subscribe_connectivity(),
        )?;

        Ok(Self {
            inner: Arc::new(DashboardInner {
                config,
                broker,
                registry,
                adapters,
                scheduler: Mutex::new(Some(scheduler)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn broker(&self) -> &CommandBroker {
        &self.inner.broker
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.inner.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect to the mesh and start the background tasks.
    ///
    /// Without a reconnect policy a failed first connect is returned as an
    /// error. With one, the failure is logged and the supervisor keeps
    /// retrying in the background.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(scheduler) = self.inner.scheduler.lock().await.take() else {
            debug!("Dashboard already started");
            return Ok(());
        };
        let config = &self.inner.config;

        match self.inner.broker.connect(&config.endpoint).await {
            Ok(()) => info!(endpoint = %config.endpoint, "Dashboard connected"),
            Err(e) if config.reconnect.is_some() => {
                warn!(error = %e, "Initial connect failed, will retry");
            }
            Err(e) => {
                *self.inner.scheduler.lock().await = Some(scheduler);
                return Err(e.into());
            }
        }

        let cancel = &self.inner.cancel;
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(scheduler.spawn(config.tick_period, cancel.child_token()));
        handles.push(
            self.inner
                .broker
                .spawn_reaper(config.reaper_period, cancel.child_token()),
        );
        if let Some(reconnect) = config.reconnect.clone() {
            handles.push(tokio::spawn(reconnect_task(
                self.inner.broker.clone(),
                config.endpoint.clone(),
                reconnect,
                cancel.child_token(),
            )));
        }

        Ok(())
    }

    /// Stop background tasks and close the mesh connection.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.broker.shutdown();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("Dashboard stopped");
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send a raw command. Fails immediately while disconnected.
    pub fn send(&self, target: &str, action: &str, args: Args) -> Result<ReplyHandle, CoreError> {
        Ok(self.inner.broker.send(target, action, args)?)
    }

    /// Send a raw command and wait for its reply.
    pub async fn request(&self, target: &str, action: &str, args: Args) -> Result<Command, CoreError> {
        Ok(self.inner.broker.request(target, action, args).await?)
    }

    /// Press an action button: record the press on the entity, then send
    /// the chosen action.
    pub fn trigger_action(&self, entity: usize, action: usize) -> Result<ReplyHandle, CoreError> {
        let registry = &self.inner.registry;
        let descriptor = registry.get(entity).ok_or(CoreError::EntityOutOfRange {
            index: entity,
            len: registry.len(),
        })?;

        let is_button = self
            .inner
            .adapters
            .get(&descriptor.kind)
            .is_some_and(|adapter| adapter.kind() == ActionButtonAdapter.kind());
        if !is_button {
            return Err(CoreError::NotActionable {
                index: entity,
                kind: descriptor.kind.clone(),
            });
        }

        let params: ActionButtonParams =
            crate::adapter::parse_params(&descriptor.kind, &descriptor.parameters)?;
        let spec = params
            .actions
            .get(action)
            .ok_or(CoreError::ActionOutOfRange {
                index: entity,
                action,
                available: params.actions.len(),
            })?;

        registry.merge_state(
            entity,
            ActionButtonParams::press_patch(action, Utc::now().timestamp_millis()),
        )?;
        info!(entity, device = %spec.device, action = %spec.action, "Sending button action");
        self.send(&spec.device, &spec.action, spec.args.clone())
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.broker.connectivity()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.broker.subscribe_connectivity()
    }

    /// Wait for the proxy to announce this client's mesh identity.
    pub async fn announced_identity(&self) -> String {
        self.inner.broker.announced_identity().await
    }

    pub fn entity(&self, index: usize) -> Option<Arc<EntityDescriptor>> {
        self.inner.registry.get(index)
    }

    pub fn entities(&self) -> Vec<Arc<EntityDescriptor>> {
        self.inner.registry.snapshot()
    }

    pub fn subscribe(&self, index: usize) -> Result<EntityStream, CoreError> {
        self.inner.registry.subscribe(index)
    }

    /// Registry-wide change counter.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.inner.registry.subscribe_changes()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Reconnect with backoff whenever the connection drops.
async fn reconnect_task(
    broker: CommandBroker,
    endpoint: Url,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut connectivity = broker.subscribe_connectivity();
    let mut attempt: u32 = 0;

    loop {
        while connectivity.borrow_and_update().connected {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        if reconnect.max_retries.is_some_and(|max| attempt >= max) {
            warn!(attempts = attempt, "Giving up on mesh reconnection");
            return;
        }

        let delay = reconnect.backoff(attempt);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        match broker.connect(&endpoint).await {
            Ok(()) => {
                info!(attempt, "Reconnected to mesh broker");
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, attempt, "Reconnect failed");
                attempt += 1;
            }
        }
    }
}
