//! Headless dashboard: run the refresh loop and stream entity changes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_stream::{StreamExt, StreamMap};

use ensemble_core::{ConnectivityState, Dashboard, EntityDescriptor};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

/// One JSON line per entity change.
#[derive(Serialize)]
struct EntityEvent<'a> {
    entity: usize,
    #[serde(flatten)]
    descriptor: &'a EntityDescriptor,
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let dash = Dashboard::new(config::dashboard_config(global)?)?;
    dash.start().await?;

    let result = stream_changes(&dash, &args, global).await;
    dash.stop().await;
    result
}

async fn stream_changes(dash: &Dashboard, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);

    let mut entities = StreamMap::new();
    for index in 0..dash.registry().len() {
        entities.insert(index, dash.subscribe(index)?.into_stream());
    }
    let mut connectivity = dash.subscribe_connectivity();
    report_connectivity(&connectivity.borrow_and_update(), color, global.quiet);

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping dashboard");
                break;
            }
            () = &mut deadline => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                report_connectivity(&connectivity.borrow_and_update(), color, global.quiet);
            }
            Some((index, entity)) = entities.next() => {
                let line = render_change(global.output, index, &entity, color)?;
                output::print_output(&line, global.quiet);
            }
        }
    }
    Ok(())
}

fn report_connectivity(state: &ConnectivityState, color: bool, quiet: bool) {
    if quiet {
        return;
    }
    let label = output::status_label(state.connected, state.error, color);
    if state.assigned_identity.is_empty() {
        eprintln!("mesh {label}");
    } else {
        eprintln!("mesh {label} as {}", state.assigned_identity);
    }
}

/// A single line describing entity `index` after a change.
fn render_change(
    format: OutputFormat,
    index: usize,
    entity: &Arc<EntityDescriptor>,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(
            &EntityEvent {
                entity: index,
                descriptor: entity,
            },
            true,
        ),
        OutputFormat::Plain => Ok(format!("{index}\t{}", Value::Object(entity.state.clone()))),
        OutputFormat::Table => {
            let time = chrono::Local::now().format("%H:%M:%S").to_string();
            let title = entity
                .title()
                .map(|t| format!(" {t:?}"))
                .unwrap_or_default();
            Ok(format!(
                "{} {} {}{title} {}",
                output::dim(&time, color),
                output::dim(&format!("#{index}"), color),
                output::accent(&entity.kind, color),
                Value::Object(entity.state.clone()),
            ))
        }
    }
}
