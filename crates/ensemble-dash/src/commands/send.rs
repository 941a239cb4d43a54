//! One-off command against a mesh device.

use std::time::Duration;

use serde_json::Value;
use tabled::Tabled;

use ensemble_core::{Args, Command, Dashboard};

use crate::cli::{GlobalOpts, SendArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ArgRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let command_args = parse_args(args.args.as_deref())?;

    // Widgets are irrelevant here; a one-shot send never refreshes them.
    let mut dash_config = config::dashboard_config(global)?;
    dash_config.widgets.clear();

    let dash = Dashboard::new(dash_config)?;
    dash.start().await?;
    let result = exchange(&dash, &args, command_args).await;
    dash.stop().await;
    let reply = result?;

    let rendered = output::render_single(global.output, &reply.args, |reply_args| {
        if reply_args.is_empty() {
            return "ok".into();
        }
        let rows: Vec<ArgRow> = reply_args
            .iter()
            .map(|(key, value)| ArgRow {
                key: key.clone(),
                value: display_value(value),
            })
            .collect();
        output::render_table(&rows)
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// Wait for the mesh to announce our identity, then send and await the reply.
async fn exchange(dash: &Dashboard, args: &SendArgs, command_args: Args) -> Result<Command, CliError> {
    let wait = Duration::from_secs(args.wait);
    let timed_out = |_| CliError::Timeout { seconds: args.wait };

    let identity = tokio::time::timeout(wait, dash.announced_identity())
        .await
        .map_err(timed_out)?;
    tracing::debug!(identity = %identity, device = %args.target, action = %args.action, "Mesh ready, sending");

    let reply = tokio::time::timeout(wait, dash.request(&args.target, &args.action, command_args))
        .await
        .map_err(timed_out)??;
    Ok(reply)
}

/// `--args` must be a JSON object; absent means no arguments.
fn parse_args(raw: Option<&str>) -> Result<Args, CliError> {
    let Some(raw) = raw else {
        return Ok(Args::new());
    };
    let invalid = |reason: String| CliError::Validation {
        field: "--args".into(),
        reason,
    };
    match serde_json::from_str::<Value>(raw).map_err(|e| invalid(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(invalid(format!("expected a JSON object, got {other}"))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
