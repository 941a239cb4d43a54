//! Widget listing.

use serde_json::Value;
use tabled::Tabled;

use ensemble_config::Widget;
use ensemble_core::AdapterRegistry;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct WidgetRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Refresh")]
    refresh: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Adapter")]
    adapter: &'static str,
}

impl WidgetRow {
    fn new(index: usize, widget: &Widget, adapters: &AdapterRegistry) -> Self {
        let param = |key: &str| {
            widget
                .params
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("-")
                .to_owned()
        };
        Self {
            index,
            kind: widget.kind.clone(),
            refresh: refresh_label(widget.refresh),
            title: param("title"),
            device: param("device"),
            adapter: if adapters.get(&widget.kind).is_some() {
                "ok"
            } else {
                "unknown"
            },
        }
    }
}

fn refresh_label(secs: u64) -> String {
    if secs == 0 {
        "never".into()
    } else {
        format!("{secs}s")
    }
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config(global)?;
    let adapters = AdapterRegistry::builtin();

    let rendered = output::render_list(
        global.output,
        &cfg.widgets,
        |i, w| WidgetRow::new(i, w, &adapters),
        |w| w.kind.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
