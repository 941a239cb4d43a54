// ── Refresh adapters ──
//
// An adapter knows how to fetch fresh state for one kind of widget. The
// scheduler hands it a `RefreshContext` and does not wait for the result;
// the adapter merges whatever it learns back into the registry itself.

mod action_button;
mod context;
mod noop;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ensemble_api::CommandBroker;

use crate::error::CoreError;
use crate::model::{EntityDescriptor, State};
use crate::store::EntityRegistry;

pub use action_button::{
    ActionButtonAdapter, ActionButtonParams, ActionSpec, Comparator, FetchState, StateMatch,
};
pub use context::{ContextChartAdapter, ContextViewAdapter, ScheduleChartAdapter};
pub use noop::NoopAdapter;

// ── Adapter trait ────────────────────────────────────────────────────

/// Fetches fresh state for one widget kind.
pub trait RefreshAdapter: Send + Sync + 'static {
    /// Lower-case kind name this adapter serves.
    fn kind(&self) -> &'static str;

    /// Check a widget's parameters before the dashboard starts.
    fn validate(&self, _params: &Value) -> Result<(), CoreError> {
        Ok(())
    }

    /// Start a refresh. The returned future runs detached; the entity's
    /// refresh flag is held until it completes.
    fn refresh(&self, ctx: RefreshContext) -> BoxFuture<'static, ()>;
}

// ── RefreshContext ───────────────────────────────────────────────────

/// Everything a refresh needs: the descriptor as it was when the refresh
/// started, a merge handle into the live entity, and the mesh client.
#[derive(Clone)]
pub struct RefreshContext {
    index: usize,
    descriptor: Arc<EntityDescriptor>,
    registry: Arc<EntityRegistry>,
    broker: CommandBroker,
}

impl RefreshContext {
    pub fn new(
        index: usize,
        descriptor: Arc<EntityDescriptor>,
        registry: Arc<EntityRegistry>,
        broker: CommandBroker,
    ) -> Self {
        Self {
            index,
            descriptor,
            registry,
            broker,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Descriptor snapshot taken when the refresh started.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn params(&self) -> &Value {
        &self.descriptor.parameters
    }

    /// The live descriptor, including changes made since the snapshot.
    pub fn current(&self) -> Arc<EntityDescriptor> {
        self.registry
            .get(self.index)
            .unwrap_or_else(|| Arc::clone(&self.descriptor))
    }

    /// Shallow-merge `partial` into the live entity state.
    pub fn merge(&self, partial: State) {
        if let Err(e) = self.registry.merge_state(self.index, partial) {
            tracing::warn!(entity = self.index, error = %e, "Merge into entity failed");
        }
    }

    pub fn broker(&self) -> &CommandBroker {
        &self.broker
    }
}

// ── AdapterRegistry ──────────────────────────────────────────────────

/// Kind name → adapter lookup. Names are matched case-insensitively.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn RefreshAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in widget adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ContextViewAdapter);
        registry.register(ContextChartAdapter);
        registry.register(ScheduleChartAdapter);
        registry.register(ActionButtonAdapter);
        registry.register(NoopAdapter::new("clock"));
        registry.register(NoopAdapter::new("break"));
        registry
    }

    /// Add or replace the adapter for its kind.
    pub fn register(&mut self, adapter: impl RefreshAdapter) {
        self.adapters
            .insert(adapter.kind().to_ascii_lowercase(), Arc::new(adapter));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn RefreshAdapter>> {
        self.adapters.get(&kind.to_ascii_lowercase()).cloned()
    }

    /// Look up and validate the adapter for one entity.
    pub fn resolve(&self, entity: &EntityDescriptor) -> Result<Arc<dyn RefreshAdapter>, CoreError> {
        let adapter = self.get(&entity.kind).ok_or_else(|| CoreError::UnknownKind {
            kind: entity.kind.clone(),
        })?;
        adapter.validate(&entity.parameters)?;
        Ok(adapter)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

// ── Shared helpers ───────────────────────────────────────────────────

/// Build a `State` from a `json!` object literal. Non-objects yield an
/// empty state.
pub(crate) fn state_of(value: Value) -> State {
    match value {
        Value::Object(map) => map,
        _ => State::new(),
    }
}

/// Decode a widget's free-form parameters into the adapter's typed form.
pub(crate) fn parse_params<T: DeserializeOwned>(kind: &str, params: &Value) -> Result<T, CoreError> {
    T::deserialize(params).map_err(|e| CoreError::InvalidParams {
        kind: kind.to_owned(),
        message: e.to_string(),
    })
}
