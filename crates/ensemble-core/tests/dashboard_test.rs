// End-to-end tests: a `Dashboard` polling widgets from an in-process mesh.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use ensemble_core::adapter::ActionButtonParams;
use ensemble_core::{ApiError, Command, Dashboard, DashboardConfig, ReconnectConfig, WidgetConfig};

// ── Mock mesh ───────────────────────────────────────────────────────

type Script = Arc<dyn Fn(&Command) -> Option<Value> + Send + Sync>;

/// Mesh broker that answers each command with `_reply` (script returns
/// `Some(args)`) or `_exception` (`None`), and records every command seen.
struct MockMesh {
    url: Url,
    seen: Arc<Mutex<Vec<Command>>>,
    release: Arc<Notify>,
}

impl MockMesh {
    /// `drop_first`: hang up on the first client right after the handshake.
    async fn start(script: Script, drop_first: bool) -> Self {
        Self::start_with(script, drop_first, None).await
    }

    /// Like `start`, but commands named `hold` get no answer until
    /// [`release`](Self::release) is called, once per held command.
    async fn start_with(script: Script, drop_first: bool, hold: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap()).parse().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(Notify::new());

        let recorder = Arc::clone(&seen);
        let gate = Arc::clone(&release);
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                if std::mem::take(&mut first) && drop_first {
                    let _ = ws.close(None).await;
                    continue;
                }

                let script = Arc::clone(&script);
                let recorder = Arc::clone(&recorder);
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    let status = json!({
                        "id": "s", "source": "", "target": "", "action": "status",
                        "args": { "handlerName": "dash-1" }, "expires": 0, "follows": false,
                    });
                    let _ = ws.send(Message::Text(status.to_string().into())).await;

                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else { continue };
                        let Ok(cmd) = Command::decode(text.as_str()) else {
                            continue;
                        };
                        recorder.lock().unwrap().push(cmd.clone());
                        if hold == Some(cmd.action.as_str()) {
                            gate.notified().await;
                        }

                        let (action, args) = match script(&cmd) {
                            Some(args) => ("_reply", args),
                            None => ("_exception", json!({ "error": "scripted failure" })),
                        };
                        let answer = json!({
                            "id": format!("re-{}", cmd.id),
                            "source": cmd.target,
                            "target": "dash-1",
                            "action": action,
                            "args": args,
                            "expires": cmd.expires,
                            "follows": cmd.id,
                        });
                        if ws.send(Message::Text(answer.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self { url, seen, release }
    }

    fn release(&self) {
        self.release.notify_one();
    }

    /// Wait until the mesh has received a command named `action`.
    async fn received(&self, action: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.actions().iter().any(|a| a == action) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn actions(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.action.clone())
            .collect()
    }
}

/// A mesh with a context store and a lighting controller.
fn home_mesh() -> Script {
    Arc::new(|cmd: &Command| match (cmd.target.as_str(), cmd.action.as_str()) {
        ("global.context", "getContext") => match cmd.args.get("field").and_then(Value::as_str) {
            Some("outdoor.temperature") => Some(json!({ "values": [{ "value": 21.5 }] })),
            Some("heatplan") => Some(json!({
                "values": [{ "value": r#"{"0": 17, "1700000000": 20}"# }]
            })),
            Some("empty") => Some(json!({ "values": [] })),
            _ => None,
        },
        ("lighting.actions", "get_scheme") => Some(json!({ "scheme": "cosy" })),
        ("lighting.actions", _) => Some(json!({})),
        _ => None,
    })
}

fn widgets() -> Vec<WidgetConfig> {
    vec![
        WidgetConfig::new(
            "contextview",
            300,
            json!({ "device": "global.context", "field": "outdoor.temperature", "title": "Outdoor" }),
        ),
        WidgetConfig::new(
            "schedulechart",
            60,
            json!({ "device": "global.context", "field": "heatplan", "numValues": 1 }),
        ),
        WidgetConfig::new(
            "actionbutton",
            10,
            json!({
                "actions": [
                    { "device": "lighting.actions", "action": "set_default", "match": { "op": "eq", "value": "___default" } },
                    { "device": "lighting.actions", "action": "set_cosy", "match": { "op": "eq", "value": "cosy" } },
                ],
                "fetch_state": { "device": "lighting.actions", "action": "get_scheme", "reply_arg": "scheme" },
            }),
        ),
        WidgetConfig::new("contextview", 300, json!({ "device": "global.context", "field": "empty" })),
        WidgetConfig::new("contextview", 300, json!({ "device": "global.context", "field": "missing" })),
        WidgetConfig::new("clock", 0, json!({})),
    ]
}

fn config(url: &Url, widgets: Vec<WidgetConfig>) -> DashboardConfig {
    let mut config = DashboardConfig::new(url.clone());
    config.connect_delay = Duration::ZERO;
    config.tick_period = Duration::from_millis(20);
    config.widgets = widgets;
    config
}

/// Wait until entity `index` has a `key` in its state.
async fn state_of(dash: &Dashboard, index: usize, key: &str) -> serde_json::Map<String, Value> {
    let mut stream = dash.subscribe(index).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if stream.current().state.contains_key(key) {
                return stream.current().state.clone();
            }
            stream.changed().await.unwrap();
        }
    })
    .await
    .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_widgets_refresh_from_mesh() {
    let mesh = MockMesh::start(home_mesh(), false).await;
    let dash = Dashboard::new(config(&mesh.url, widgets())).unwrap();
    dash.start().await.unwrap();

    assert_eq!(dash.announced_identity().await, "dash-1");

    let view = state_of(&dash, 0, "value").await;
    assert_eq!(Value::Object(view), json!({ "value": 21.5, "exception": false }));

    let chart = state_of(&dash, 1, "value").await;
    assert_eq!(chart["value"], json!([{ "time": 1_700_000_000, "value": 20 }]));

    let button = state_of(&dash, 2, "state").await;
    assert_eq!(button["state"], 1);

    let empty = state_of(&dash, 3, "exception").await;
    assert_eq!(Value::Object(empty), json!({ "value": false, "exception": true }));

    let failed = state_of(&dash, 4, "exception").await;
    assert_eq!(failed["exception"], true);

    // Clocks have nothing to fetch.
    assert!(dash.entity(5).unwrap().state.is_empty());

    let started = dash.entity(0).unwrap().last_refreshed_at;
    assert!(started > chrono::DateTime::UNIX_EPOCH);

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_widget_fetched_once_per_interval() {
    let mesh = MockMesh::start(home_mesh(), false).await;
    let dash = Dashboard::new(config(&mesh.url, widgets())).unwrap();
    dash.start().await.unwrap();

    state_of(&dash, 0, "value").await;
    // Many ticks pass; every interval is far longer than this.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let gets = mesh.actions().iter().filter(|a| *a == "getContext").count();
    assert_eq!(gets, 4);
    let fetches = mesh.actions().iter().filter(|a| *a == "get_scheme").count();
    assert_eq!(fetches, 1);

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_action_sends_and_records_press() {
    let mesh = MockMesh::start(home_mesh(), false).await;
    let dash = Dashboard::new(config(&mesh.url, widgets())).unwrap();
    dash.start().await.unwrap();

    let reply = dash.trigger_action(2, 0).unwrap().await.unwrap();
    assert_eq!(reply.action, "_reply");
    assert!(mesh.actions().contains(&"set_default".to_owned()));

    let state = dash.entity(2).unwrap().state.clone();
    assert_eq!(state["pressing"], false);
    assert!(state["lastSend"].as_i64().unwrap() > 0);

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_request_and_exception() {
    let mesh = MockMesh::start(home_mesh(), false).await;
    let dash = Dashboard::new(config(&mesh.url, vec![])).unwrap();
    dash.start().await.unwrap();

    let mut args = ensemble_core::Args::new();
    args.insert("field".into(), json!("outdoor.temperature"));
    let reply = dash.request("global.context", "getContext", args).await.unwrap();
    assert_eq!(reply.args["values"][0]["value"], 21.5);

    let err = dash
        .request("nobody.home", "ping", ensemble_core::Args::new())
        .await
        .unwrap_err();
    match err {
        ensemble_core::CoreError::Api(api) => assert!(api.is_exception()),
        other => panic!("expected mesh exception, got {other:?}"),
    }

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_after_drop() {
    let mesh = MockMesh::start(home_mesh(), true).await;
    let mut config = config(&mesh.url, widgets());
    config.reconnect = Some(ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_retries: Some(5),
    });

    let dash = Dashboard::new(config).unwrap();
    dash.start().await.unwrap();

    // First connection is dropped by the mesh; the supervisor comes back.
    let view = state_of(&dash, 0, "value").await;
    assert_eq!(view["value"], 21.5);
    assert!(dash.connectivity().connected);
    assert_eq!(dash.connectivity().assigned_identity, "dash-1");

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_press_during_fetch_keeps_pressed_state() {
    let mesh = MockMesh::start_with(home_mesh(), false, Some("get_scheme")).await;
    let button = WidgetConfig::new(
        "actionbutton",
        300,
        json!({
            "actions": [
                { "device": "lighting.actions", "action": "set_default", "match": { "op": "eq", "value": "___default" } },
                { "device": "lighting.actions", "action": "set_cosy", "match": { "op": "eq", "value": "cosy" } },
            ],
            "fetchState": { "device": "lighting.actions", "action": "get_scheme", "replyArg": "scheme" },
            "resetTime": 60_000,
        }),
    );
    let dash = Dashboard::new(config(&mesh.url, vec![button])).unwrap();
    dash.start().await.unwrap();

    // The fetch is in flight; the user picks action 0 meanwhile.
    mesh.received("get_scheme").await;
    assert!(dash.registry().is_refreshing(0));
    let now_ms = chrono::Utc::now().timestamp_millis();
    dash.registry()
        .merge_state(0, ActionButtonParams::press_patch(0, now_ms))
        .unwrap();

    // The mesh then reports "cosy", which would select action 1.
    mesh.release();
    tokio::time::timeout(Duration::from_secs(5), async {
        while dash.registry().is_refreshing(0) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let state = dash.entity(0).unwrap().state.clone();
    assert_eq!(state["state"], 0);
    assert_eq!(state["lastSend"], now_ms);

    dash.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_fails_requests_in_flight() {
    let mesh = MockMesh::start_with(home_mesh(), false, Some("ping")).await;
    let mut config = config(&mesh.url, vec![]);
    config.request_ttl = Duration::from_secs(1);
    config.reaper_period = Duration::from_millis(200);

    let dash = Dashboard::new(config).unwrap();
    dash.start().await.unwrap();

    let handle = dash.send("nobody.home", "ping", ensemble_core::Args::new()).unwrap();
    mesh.received("ping").await;
    dash.stop().await;

    // Well inside the 1s expiry, so only the stop can have resolved it.
    let outcome = tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .unwrap();
    assert!(matches!(outcome, Err(ApiError::Abandoned)));
    assert_eq!(dash.broker().pending_count(), 0);
}
