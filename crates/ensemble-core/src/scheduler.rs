// ── Refresh scheduler ──
//
// Fixed-period poller over the entity registry. Each tick, while the mesh
// is connected, every due entity is stamped and handed to its adapter.
// Refreshes run detached; the tick never waits on one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ensemble_api::{CommandBroker, ConnectivityState};

use crate::adapter::{AdapterRegistry, RefreshAdapter, RefreshContext};
use crate::error::CoreError;
use crate::store::EntityRegistry;

/// Drives refreshes for every entity in a registry.
pub struct RefreshScheduler {
    registry: Arc<EntityRegistry>,
    /// Adapter per registry index, resolved once up front.
    bindings: Vec<Arc<dyn RefreshAdapter>>,
    broker: CommandBroker,
    connectivity: watch::Receiver<ConnectivityState>,
}

impl RefreshScheduler {
    /// Bind every entity to its adapter.
    ///
    /// Fails with [`CoreError::UnknownKind`] or [`CoreError::InvalidParams`]
    /// if any entity cannot be refreshed.
    pub fn new(
        registry: Arc<EntityRegistry>,
        adapters: &AdapterRegistry,
        broker: CommandBroker,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> Result<Self, CoreError> {
        let bindings = registry
            .snapshot()
            .iter()
            .map(|entity| adapters.resolve(entity))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            registry,
            bindings,
            broker,
            connectivity,
        })
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Run one scheduling pass at `now`. Returns the number of refreshes started.
    ///
    /// Skipped entirely while disconnected. An entity is started only if
    /// its interval has elapsed and no earlier refresh of it is still in
    /// flight; its `last_refreshed_at` is stamped before the adapter runs.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        if !self.connectivity.borrow().connected {
            tracing::trace!("Not connected, skipping refresh tick");
            return 0;
        }

        let mut started = 0;
        for (index, adapter) in self.bindings.iter().enumerate() {
            if !self.registry.is_due(index, now) {
                continue;
            }
            let Some(guard) = self.registry.try_begin_refresh(index) else {
                continue;
            };
            let descriptor = match self.registry.stamp_refreshed(index, now) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::warn!(entity = index, error = %e, "Cannot stamp entity");
                    continue;
                }
            };

            tracing::debug!(entity = index, kind = adapter.kind(), "Refreshing entity");
            let ctx = RefreshContext::new(
                index,
                descriptor,
                Arc::clone(&self.registry),
                self.broker.clone(),
            );
            let refresh = adapter.refresh(ctx);
            tokio::spawn(async move {
                refresh.await;
                drop(guard);
            });
            started += 1;
        }

        if started > 0 {
            tracing::debug!(started, "Refresh tick");
        }
        started
    }

    /// Tick every `period` until `cancel` fires.
    ///
    /// The first tick happens one period after start.
    pub fn spawn(self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick(Utc::now());
                    }
                }
            }
            tracing::debug!("Refresh scheduler stopped");
        })
    }
}
