// ── Context broker widgets ──
//
// `contextview`, `contextchart` and `schedulechart` all read a field from a
// mesh context store with `getContext` and differ only in what they keep
// from the reply.

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Number, Value, json};

use ensemble_api::{Args, CommandBroker};

use super::{RefreshAdapter, RefreshContext, parse_params, state_of};
use crate::error::CoreError;

const GET_CONTEXT: &str = "getContext";

/// Parameters shared by the context widgets.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContextParams {
    /// Context store device, e.g. `global.context`.
    device: String,
    field: String,
    /// History depth requested by the chart widgets.
    #[serde(default, alias = "numValues")]
    num_values: Option<u64>,
}

/// Send `getContext` and return the reply's `values` array.
async fn fetch_values(
    broker: &CommandBroker,
    params: &ContextParams,
    with_num: bool,
) -> Result<Vec<Value>, ensemble_api::Error> {
    let mut args = Args::new();
    args.insert("field".into(), Value::String(params.field.clone()));
    if let (true, Some(num)) = (with_num, params.num_values) {
        args.insert("num".into(), Value::from(num));
    }

    let reply = broker.request(&params.device, GET_CONTEXT, args).await?;
    Ok(match reply.args.get("values") {
        Some(Value::Array(values)) => values.clone(),
        _ => Vec::new(),
    })
}

// ── contextview ──────────────────────────────────────────────────────

/// Latest value of one context field.
///
/// Merges `{value, exception: false}`, or `{value: false, exception: true}`
/// when the field has no values or the request fails.
pub struct ContextViewAdapter;

impl RefreshAdapter for ContextViewAdapter {
    fn kind(&self) -> &'static str {
        "contextview"
    }

    fn validate(&self, params: &Value) -> Result<(), CoreError> {
        parse_params::<ContextParams>(self.kind(), params).map(|_| ())
    }

    fn refresh(&self, ctx: RefreshContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Ok(params) = parse_params::<ContextParams>("contextview", ctx.params()) else {
                return;
            };

            let patch = match fetch_values(ctx.broker(), &params, false).await {
                Ok(values) => match values.first().and_then(|v| v.get("value")) {
                    Some(value) => json!({ "value": value, "exception": false }),
                    None => json!({ "value": false, "exception": true }),
                },
                Err(e) => {
                    tracing::debug!(field = %params.field, error = %e, "Context fetch failed");
                    json!({ "value": false, "exception": true })
                }
            };
            ctx.merge(state_of(patch));
        })
    }
}

// ── contextchart ─────────────────────────────────────────────────────

/// Recent history of one context field, merged as `{value: [..]}`.
///
/// A failed request leaves the state untouched.
pub struct ContextChartAdapter;

impl RefreshAdapter for ContextChartAdapter {
    fn kind(&self) -> &'static str {
        "contextchart"
    }

    fn validate(&self, params: &Value) -> Result<(), CoreError> {
        parse_params::<ContextParams>(self.kind(), params).map(|_| ())
    }

    fn refresh(&self, ctx: RefreshContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Ok(params) = parse_params::<ContextParams>("contextchart", ctx.params()) else {
                return;
            };

            match fetch_values(ctx.broker(), &params, true).await {
                Ok(values) => ctx.merge(state_of(json!({ "value": values }))),
                Err(e) => {
                    tracing::warn!(field = %params.field, error = %e, "Context history fetch failed");
                }
            }
        })
    }
}

// ── schedulechart ────────────────────────────────────────────────────

/// A schedule stored as one context value: a JSON object mapping a start
/// time to a value. Merged as `{value: [{time, value}, ..]}`, sorted by
/// time, skipping the `0` entry that holds the starting value.
pub struct ScheduleChartAdapter;

impl RefreshAdapter for ScheduleChartAdapter {
    fn kind(&self) -> &'static str {
        "schedulechart"
    }

    fn validate(&self, params: &Value) -> Result<(), CoreError> {
        parse_params::<ContextParams>(self.kind(), params).map(|_| ())
    }

    fn refresh(&self, ctx: RefreshContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Ok(params) = parse_params::<ContextParams>("schedulechart", ctx.params()) else {
                return;
            };

            match fetch_values(ctx.broker(), &params, true).await {
                Ok(values) => {
                    let points = values
                        .first()
                        .and_then(|v| v.get("value"))
                        .map(schedule_points)
                        .unwrap_or_default();
                    ctx.merge(state_of(json!({ "value": points })));
                }
                Err(e) => {
                    tracing::warn!(field = %params.field, error = %e, "Schedule fetch failed");
                }
            }
        })
    }
}

/// Turn a schedule (JSON object, or a string holding one) into
/// `[{time, value}]` points with `time > 0`. Unparseable input yields none.
fn schedule_points(raw: &Value) -> Vec<Value> {
    let parsed;
    let schedule: &Map<String, Value> = match raw {
        Value::Object(map) => map,
        Value::String(text) => {
            parsed = match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!("Schedule value is not a JSON object");
                    return Vec::new();
                }
            };
            &parsed
        }
        _ => return Vec::new(),
    };

    let mut points: Vec<(f64, Value)> = schedule
        .iter()
        .filter_map(|(key, value)| {
            let time: f64 = key.trim().parse().ok()?;
            (time > 0.0).then(|| (time, value.clone()))
        })
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    points
        .into_iter()
        .map(|(time, value)| json!({ "time": time_number(time), "value": value }))
        .collect()
}

/// Integral times stay integers on the wire.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn time_number(time: f64) -> Value {
    if time.fract().abs() < f64::EPSILON && time < 9.0e15 {
        Value::from(time as i64)
    } else {
        Number::from_f64(time).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn schedule_string_is_parsed_and_sorted() {
        let raw = json!(r#"{"0": 18, "1700003600": 21.5, "1700000000": 19, "soon": 3}"#);
        assert_eq!(
            schedule_points(&raw),
            vec![
                json!({ "time": 1_700_000_000, "value": 19 }),
                json!({ "time": 1_700_003_600, "value": 21.5 }),
            ]
        );
    }

    #[test]
    fn schedule_object_is_accepted() {
        let raw = json!({ "12.5": "on" });
        assert_eq!(schedule_points(&raw), vec![json!({ "time": 12.5, "value": "on" })]);
    }

    #[test]
    fn malformed_schedule_yields_nothing() {
        assert!(schedule_points(&json!("{not json")).is_empty());
        assert!(schedule_points(&json!("[1, 2]")).is_empty());
        assert!(schedule_points(&json!(42)).is_empty());
    }

    #[test]
    fn context_params_accept_both_spellings() {
        let a: ContextParams =
            parse_params("contextchart", &json!({ "device": "d", "field": "f", "numValues": 96 }))
                .unwrap();
        let b: ContextParams =
            parse_params("contextchart", &json!({ "device": "d", "field": "f", "num_values": 96 }))
                .unwrap();
        assert_eq!(a.num_values, Some(96));
        assert_eq!(b.num_values, Some(96));
    }
}
