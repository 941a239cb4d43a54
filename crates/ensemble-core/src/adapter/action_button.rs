// ── actionbutton widget ──
//
// A button that cycles through a list of mesh actions. Its refresh asks a
// device which action currently applies and records that action's index
// in `state.state`, unless the user is mid-press or has just sent one.

use std::cmp::Ordering;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

use ensemble_api::Args;

use super::{RefreshAdapter, RefreshContext, parse_params, state_of};
use crate::error::CoreError;
use crate::model::State;

const KIND: &str = "actionbutton";

/// Default reset window after a press, in milliseconds.
const DEFAULT_RESET_MS: u64 = 10;

// ── Parameters ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButtonParams {
    #[serde(default)]
    pub title: Option<String>,
    pub actions: Vec<ActionSpec>,
    /// How to ask the mesh which action is currently in effect.
    #[serde(default, alias = "fetchState")]
    pub fetch_state: Option<FetchState>,
    /// After a press, refreshes leave the button alone for this long.
    #[serde(default = "default_reset_ms", alias = "resetTime", alias = "reset_time")]
    pub reset_time_ms: u64,
}

fn default_reset_ms() -> u64 {
    DEFAULT_RESET_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub device: String,
    pub action: String,
    #[serde(default, deserialize_with = "lenient_args")]
    pub args: Args,
    #[serde(default)]
    pub title: Option<String>,
    /// Selects this action when the fetched state satisfies it.
    #[serde(default, rename = "match")]
    pub matcher: Option<StateMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchState {
    pub device: String,
    pub action: String,
    #[serde(default, deserialize_with = "lenient_args")]
    pub args: Args,
    /// Reply argument holding the state value.
    #[serde(alias = "replyArg")]
    pub reply_arg: String,
}

/// `fetched <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMatch {
    pub op: Comparator,
    pub value: Value,
}

impl StateMatch {
    pub fn matches(&self, fetched: &Value) -> bool {
        self.op.apply(fetched, &self.value)
    }
}

/// Args given as anything other than an object are treated as empty.
fn lenient_args<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Args, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Args::new(),
    })
}

// ── Comparator ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Comparator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    #[strum(to_string = "arr_contains", serialize = "arrcontains")]
    ArrContains,
    #[strum(to_string = "str_contains", serialize = "strcontains")]
    StrContains,
}

impl TryFrom<String> for Comparator {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Comparator> for String {
    fn from(op: Comparator) -> Self {
        op.to_string()
    }
}

impl Comparator {
    /// Evaluate `left <op> right`. Numbers compare numerically, strings
    /// lexically; mismatched types are unordered.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => values_equal(left, right),
            Self::Neq => !values_equal(left, right),
            Self::Lt => order(left, right) == Some(Ordering::Less),
            Self::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => order(left, right) == Some(Ordering::Greater),
            Self::Gte => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
            Self::ArrContains => left
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, right))),
            Self::StrContains => match (left.as_str(), right.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ── Button state ─────────────────────────────────────────────────────

impl ActionButtonParams {
    /// Index of the first action whose matcher accepts `fetched`, else 0.
    pub fn select(&self, fetched: &Value) -> usize {
        self.actions
            .iter()
            .position(|a| a.matcher.as_ref().is_some_and(|m| m.matches(fetched)))
            .unwrap_or(0)
    }

    /// Whether refreshes should leave the button alone right now.
    pub fn is_busy(&self, state: &State, now_ms: i64) -> bool {
        if state.get("pressing").and_then(Value::as_bool) == Some(true) {
            return true;
        }
        let reset = i64::try_from(self.reset_time_ms).unwrap_or(i64::MAX);
        state
            .get("lastSend")
            .and_then(Value::as_i64)
            .is_some_and(|last| last > now_ms.saturating_sub(reset))
    }

    /// State written when action `index` is sent.
    pub fn press_patch(index: usize, now_ms: i64) -> State {
        state_of(json!({ "lastSend": now_ms, "pressing": false, "state": index }))
    }
}

// ── Adapter ──────────────────────────────────────────────────────────

pub struct ActionButtonAdapter;

impl RefreshAdapter for ActionButtonAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn validate(&self, params: &Value) -> Result<(), CoreError> {
        let params: ActionButtonParams = parse_params(KIND, params)?;
        if params.actions.is_empty() {
            return Err(CoreError::InvalidParams {
                kind: KIND.into(),
                message: "at least one action is required".into(),
            });
        }
        Ok(())
    }

    fn refresh(&self, ctx: RefreshContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Ok(params) = parse_params::<ActionButtonParams>(KIND, ctx.params()) else {
                return;
            };
            let Some(fetch) = params.fetch_state.as_ref() else {
                return;
            };

            let fetched = match ctx
                .broker()
                .request(&fetch.device, &fetch.action, fetch.args.clone())
                .await
            {
                Ok(reply) => reply.args.get(&fetch.reply_arg).cloned().unwrap_or(Value::Null),
                Err(e) => {
                    tracing::warn!(
                        device = %fetch.device,
                        action = %fetch.action,
                        error = %e,
                        "Button state fetch failed"
                    );
                    Value::Null
                }
            };

            // The user may have pressed the button while the fetch was in flight.
            let current = ctx.current();
            if params.is_busy(&current.state, Utc::now().timestamp_millis()) {
                tracing::debug!(entity = ctx.index(), "Button busy, keeping its state");
                return;
            }

            let index = params.select(&fetched);
            tracing::debug!(entity = ctx.index(), %fetched, index, "Button state fetched");
            ctx.merge(state_of(json!({ "state": index })));
        })
    }
}
