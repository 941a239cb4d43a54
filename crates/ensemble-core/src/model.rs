// ── Entity model ──
//
// A polled widget/data source as the registry stores it. Only `state` and
// `last_refreshed_at` change after startup.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::WidgetConfig;

/// Free-form widget state, updated only through shallow merges.
pub type State = Map<String, Value>;

/// One pollable entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    /// Selects the refresh adapter.
    pub kind: String,
    /// Adapter configuration; never mutated.
    pub parameters: Value,
    pub state: State,
    /// 0 means never auto-refresh.
    pub refresh_interval_secs: u64,
    /// When the last refresh was *started*. Epoch until the first one.
    pub last_refreshed_at: DateTime<Utc>,
}

impl EntityDescriptor {
    pub fn new(kind: impl Into<String>, parameters: Value, refresh_interval_secs: u64) -> Self {
        Self {
            kind: kind.into(),
            parameters,
            state: State::new(),
            refresh_interval_secs,
            last_refreshed_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Display title from the `title` parameter, if any.
    pub fn title(&self) -> Option<&str> {
        self.parameters.get("title").and_then(Value::as_str)
    }

    /// The instant after which this entity is due, or `None` if it never is.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        if self.refresh_interval_secs == 0 {
            return None;
        }
        let interval = i64::try_from(self.refresh_interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)?;
        self.last_refreshed_at.checked_add_signed(interval)
    }

    /// `true` iff the interval is non-zero and has fully elapsed before `now`.
    ///
    /// Does not consider an in-flight refresh; the registry tracks that.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at().is_some_and(|due| due < now)
    }

    /// Shallow merge: every key in `partial` overwrites the same key in `state`.
    pub fn merge(&mut self, partial: State) {
        for (key, value) in partial {
            self.state.insert(key, value);
        }
    }
}

impl From<&WidgetConfig> for EntityDescriptor {
    fn from(widget: &WidgetConfig) -> Self {
        Self::new(widget.kind.clone(), widget.params.clone(), widget.refresh_secs)
    }
}
