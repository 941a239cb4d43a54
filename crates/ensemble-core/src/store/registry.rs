// ── Entity registry ──
//
// Fixed-length, index-addressed store of entity descriptors with
// push-based change notification. Every slot owns a `watch` channel, so a
// mutation is a single atomic replace that never spans an await point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::CoreError;
use crate::model::{EntityDescriptor, State};
use crate::stream::EntityStream;

struct Slot {
    descriptor: watch::Sender<Arc<EntityDescriptor>>,
    /// Set while a refresh for this entity is in flight.
    refreshing: AtomicBool,
}

/// Ordered collection of pollable entities.
///
/// The set of entities is fixed at construction; only their state and
/// refresh stamps change afterwards. Every mutation bumps a registry-wide
/// version counter.
pub struct EntityRegistry {
    slots: Vec<Slot>,
    version: watch::Sender<u64>,
}

impl EntityRegistry {
    pub fn new(entities: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        let slots = entities
            .into_iter()
            .map(|entity| Slot {
                descriptor: watch::Sender::new(Arc::new(entity)),
                refreshing: AtomicBool::new(false),
            })
            .collect();
        let (version, _) = watch::channel(0u64);

        Self { slots, version }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current descriptor at `index` (cheap `Arc` clone).
    pub fn get(&self, index: usize) -> Option<Arc<EntityDescriptor>> {
        self.slots
            .get(index)
            .map(|slot| slot.descriptor.borrow().clone())
    }

    /// All current descriptors in registry order.
    pub fn snapshot(&self) -> Vec<Arc<EntityDescriptor>> {
        self.slots
            .iter()
            .map(|slot| slot.descriptor.borrow().clone())
            .collect()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Replace the whole descriptor at `index`.
    pub fn replace(&self, index: usize, entity: EntityDescriptor) -> Result<(), CoreError> {
        let slot = self.slot(index)?;
        slot.descriptor.send_replace(Arc::new(entity));
        self.bump_version();
        Ok(())
    }

    /// Read-modify-write the descriptor at `index` as one atomic step.
    ///
    /// Returns the descriptor as written.
    pub fn update(
        &self,
        index: usize,
        f: impl FnOnce(&mut EntityDescriptor),
    ) -> Result<Arc<EntityDescriptor>, CoreError> {
        let slot = self.slot(index)?;
        let mut written = None;
        // `send_modify` holds the channel's write lock for the closure.
        slot.descriptor.send_modify(|current| {
            f(Arc::make_mut(current));
            written = Some(Arc::clone(current));
        });
        self.bump_version();
        Ok(written.unwrap_or_else(|| slot.descriptor.borrow().clone()))
    }

    /// Shallow-merge `partial` into the entity's state.
    pub fn merge_state(&self, index: usize, partial: State) -> Result<(), CoreError> {
        self.update(index, |entity| entity.merge(partial)).map(|_| ())
    }

    /// Record that a refresh of `index` started at `now`.
    pub fn stamp_refreshed(
        &self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Arc<EntityDescriptor>, CoreError> {
        self.update(index, |entity| entity.last_refreshed_at = now)
    }

    // ── Refresh flag ─────────────────────────────────────────────────

    /// Whether the entity's interval elapsed and no refresh is in flight.
    pub fn is_due(&self, index: usize, now: DateTime<Utc>) -> bool {
        self.slots.get(index).is_some_and(|slot| {
            !slot.refreshing.load(Ordering::Acquire) && slot.descriptor.borrow().is_due(now)
        })
    }

    pub fn is_refreshing(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.refreshing.load(Ordering::Acquire))
    }

    /// Claim the refresh flag for `index`.
    ///
    /// Returns `None` if a refresh is already in flight. The flag is
    /// released when the returned guard drops.
    pub fn try_begin_refresh(self: &Arc<Self>, index: usize) -> Option<RefreshGuard> {
        let slot = self.slots.get(index)?;
        slot.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RefreshGuard {
            registry: Arc::clone(self),
            index,
        })
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to one entity's changes.
    pub fn subscribe(&self, index: usize) -> Result<EntityStream, CoreError> {
        let slot = self.slot(index)?;
        Ok(EntityStream::new(slot.descriptor.subscribe()))
    }

    /// Subscribe to the registry-wide change counter.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, index: usize) -> Result<&Slot, CoreError> {
        self.slots.get(index).ok_or(CoreError::EntityOutOfRange {
            index,
            len: self.slots.len(),
        })
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Holds an entity's refresh flag; clears it on drop, including when the
/// refresh task panics or is aborted.
pub struct RefreshGuard {
    registry: Arc<EntityRegistry>,
    index: usize,
}

impl RefreshGuard {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.registry.slots.get(self.index) {
            slot.refreshing.store(false, Ordering::Release);
        }
    }
}
