// ── Reactive entity streams ──
//
// Subscription type for consuming one entity's changes from the registry.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::EntityDescriptor;

/// A subscription to a single registry entity.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`.
pub struct EntityStream {
    current: Arc<EntityDescriptor>,
    receiver: watch::Receiver<Arc<EntityDescriptor>>,
}

impl EntityStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Arc<EntityDescriptor>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The descriptor as of creation or the last [`changed()`](Self::changed).
    pub fn current(&self) -> &Arc<EntityDescriptor> {
        &self.current
    }

    /// The latest descriptor (may have changed since creation).
    pub fn latest(&self) -> Arc<EntityDescriptor> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new descriptor.
    /// Returns `None` if the registry has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<EntityDescriptor>> {
        self.receiver.changed().await.ok()?;
        let latest = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&latest);
        Some(latest)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The stream yields the current descriptor first.
    pub fn into_stream(self) -> EntityWatchStream {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct EntityWatchStream {
    inner: WatchStream<Arc<EntityDescriptor>>,
}

impl Stream for EntityWatchStream {
    type Item = Arc<EntityDescriptor>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
