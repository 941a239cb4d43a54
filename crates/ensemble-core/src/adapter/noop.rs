use futures_util::future::{self, BoxFuture, FutureExt};

use super::{RefreshAdapter, RefreshContext};

/// Adapter for widgets with nothing to fetch (`clock`, `break`).
pub struct NoopAdapter {
    kind: &'static str,
}

impl NoopAdapter {
    pub const fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

impl RefreshAdapter for NoopAdapter {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn refresh(&self, _ctx: RefreshContext) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}
