//! # Live Query Editor
//!
//! `GET /ws/editor` opens one [`EditorSession`] per socket. Edits arrive as
//! JSON messages, every accepted edit is echoed back with its display text,
//! and the session's debounce scheduler decides when the query runs.
//!
//! Three tasks cooperate per socket:
//!
//! ```text
//!  socket reader ──edits──► EditorSession ──(debounced)──► exec channel
//!        │                                                     │
//!        └──── replies ────► out channel ◄──── results ── executor task
//!                                │
//!                          writer task ──► socket
//! ```
//!
//! The scheduler callback only enqueues, so queries never run while the
//! scheduler's lock is held. Closing the socket tears the session down.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use fq_core::QueryModel;
use fq_editor::{DebounceScheduler, EditorSession};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::dashboards::DashboardManager;
use crate::datasource::Frame;
use crate::AppState;

/// Messages sent by the editor client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Set one field of the model, e.g. `{"field": "where.0.value", "value": "42"}`.
    Edit { field: String, value: Value },
    /// Switch collection; resets the limit.
    Collection { path: String },
    /// Swap the whole model, e.g. when changing editing mode.
    Replace { model: QueryModel },
    /// Run now, skipping the quiet period.
    Run,
    /// Write the current model to a dashboard panel.
    Save { dashboard: String, panel: String },
}

/// Messages sent to the editor client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Model {
        model: QueryModel,
        display: String,
        executable: bool,
    },
    Result {
        frames: Vec<Frame>,
    },
    Error {
        message: String,
    },
    Saved {
        dashboard: String,
        panel: String,
    },
}

impl ServerMessage {
    pub fn model(model: &QueryModel) -> Self {
        Self::Model {
            model: model.clone(),
            display: model.to_display_string(),
            executable: model.is_executable(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditorParams {
    pub dashboard: Option<String>,
    pub panel: Option<String>,
}

pub async fn ws_editor(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<EditorParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Apply one client message to the session and produce the reply, if any.
///
/// `run` has no direct reply: its result arrives through the executor.
pub async fn apply_client_message(
    session: &mut EditorSession,
    msg: ClientMessage,
    dashboards: &DashboardManager,
) -> Option<ServerMessage> {
    let outcome = match msg {
        ClientMessage::Edit { field, value } => session.apply_edit(&field, &value).map(ServerMessage::model),
        ClientMessage::Collection { path } => session.change_collection(&path).map(ServerMessage::model),
        ClientMessage::Replace { model } => Ok(ServerMessage::model(session.replace(model))),
        ClientMessage::Run => {
            session.run();
            return None;
        }
        ClientMessage::Save { dashboard, panel } => {
            return Some(
                match dashboards
                    .save_panel_query(&dashboard, &panel, session.model().clone())
                    .await
                {
                    Ok(_) => ServerMessage::Saved { dashboard, panel },
                    Err(e) => ServerMessage::error(e),
                },
            );
        }
    };

    Some(outcome.unwrap_or_else(|e| {
        tracing::debug!("Rejected edit: {}", e);
        ServerMessage::error(e)
    }))
}

async fn initial_model(dashboards: &DashboardManager, params: &EditorParams) -> Result<QueryModel, String> {
    match (&params.dashboard, &params.panel) {
        (Some(dashboard), Some(panel)) => dashboards
            .panel_query(dashboard, panel)
            .await
            .map_err(|e| e.to_string()),
        (None, None) => Ok(QueryModel::default()),
        _ => Err("both dashboard and panel are needed to open a panel".into()),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: EditorParams) {
    let (sink, stream) = socket.split();
    run_session(sink, stream, state, params).await;
}

/// Drive one editor session until `stream` ends or sends a close frame.
async fn run_session<Si, St, E>(
    mut sink: Si,
    mut stream: St,
    state: Arc<AppState>,
    params: EditorParams,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, E>> + Unpin,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (exec_tx, mut exec_rx) = mpsc::unbounded_channel::<QueryModel>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode editor message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let executor = {
        let state = Arc::clone(&state);
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(model) = exec_rx.recv().await {
                let reply = match state.datasource.execute(&model).await {
                    Ok(frames) => ServerMessage::Result { frames },
                    Err(e) => ServerMessage::error(e),
                };
                if out_tx.send(reply).is_err() {
                    break;
                }
            }
        })
    };

    let initial = match initial_model(&state.dashboards, &params).await {
        Ok(model) => model,
        Err(e) => {
            let _ = out_tx.send(ServerMessage::error(e));
            QueryModel::default()
        }
    };

    let scheduler = DebounceScheduler::new(state.quiet_period, move |model: QueryModel| {
        // the receiver only goes away once the socket is closing
        let _ = exec_tx.send(model);
    });
    let mut session = EditorSession::new(initial, scheduler);
    tracing::info!(
        dashboard = ?params.dashboard,
        panel = ?params.panel,
        "Editor session opened"
    );
    let _ = out_tx.send(ServerMessage::model(session.model()));

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => apply_client_message(&mut session, msg, &state.dashboards).await,
            Err(e) => Some(ServerMessage::error(format!("invalid message: {}", e))),
        };
        if let Some(reply) = reply {
            if out_tx.send(reply).is_err() {
                break;
            }
        }
    }

    session.teardown();
    drop(session);
    executor.abort();
    writer.abort();
    tracing::info!("Editor session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<QueryModel>>>;

    fn session(initial: QueryModel) -> (EditorSession, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let scheduler = DebounceScheduler::new(Duration::from_millis(500), move |m: QueryModel| {
            sink.lock().unwrap().push(m);
        });
        (EditorSession::new(initial, scheduler), log)
    }

    fn parse(value: Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_client_message_format() {
        assert!(matches!(
            parse(json!({ "type": "edit", "field": "limit", "value": 5 })),
            ClientMessage::Edit { field, .. } if field == "limit"
        ));
        assert!(matches!(parse(json!({ "type": "run" })), ClientMessage::Run));
        assert!(matches!(
            parse(json!({ "type": "replace", "model": { "query": "select * from users" } })),
            ClientMessage::Replace { model: QueryModel::FreeForm(_) }
        ));
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "explode" })).is_err());
    }

    #[test]
    fn test_server_message_format() {
        let msg = ServerMessage::model(&QueryModel::structured("users"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "model");
        assert_eq!(value["display"], "SELECT * FROM users");
        assert_eq!(value["executable"], true);
        assert_eq!(value["model"]["collectionPath"], "users");

        let err = serde_json::to_value(ServerMessage::error("boom")).unwrap();
        assert_eq!(err, json!({ "type": "error", "message": "boom" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_echo_model_and_debounce() {
        let dashboards = DashboardManager::new();
        let (mut session, log) = session(QueryModel::structured("users"));

        let reply = apply_client_message(
            &mut session,
            parse(json!({ "type": "edit", "field": "limit", "value": 10 })),
            &dashboards,
        )
        .await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Model { ref display, .. }) if display == "SELECT * FROM users LIMIT 10"
        ));

        let reply = apply_client_message(
            &mut session,
            parse(json!({ "type": "collection", "path": "orders" })),
            &dashboards,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Model { executable: true, .. })));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[QueryModel::structured("orders")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_edit_replies_error() {
        let dashboards = DashboardManager::new();
        let (mut session, log) = session(QueryModel::free_form("select * from users"));

        let reply = apply_client_message(
            &mut session,
            parse(json!({ "type": "edit", "field": "limit", "value": 3 })),
            &dashboards,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_executes_immediately_without_reply() {
        let dashboards = DashboardManager::new();
        let (mut session, log) = session(QueryModel::structured("users"));

        let reply = apply_client_message(&mut session, ClientMessage::Run, &dashboards).await;
        assert!(reply.is_none());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_writes_panel() {
        let dashboards = DashboardManager::new();
        let dash = dashboards
            .create(serde_json::from_value(json!({ "name": "Team" })).unwrap())
            .await
            .unwrap();
        let (mut session, _log) = session(QueryModel::structured("users"));

        let reply = apply_client_message(
            &mut session,
            ClientMessage::Save {
                dashboard: dash.id.clone(),
                panel: "p1".into(),
            },
            &dashboards,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Saved { .. })));
        assert_eq!(
            dashboards.panel_query(&dash.id, "p1").await.unwrap(),
            QueryModel::structured("users")
        );

        let reply = apply_client_message(
            &mut session,
            ClientMessage::Save {
                dashboard: "missing".into(),
                panel: "p1".into(),
            },
            &dashboards,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }

    mod socket {
        use std::convert::Infallible;
        use std::pin::Pin;
        use std::time::Instant;

        use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
        use tokio::task::JoinHandle;
        use tokio::time::timeout;

        use std::time::Duration;

        use axum::extract::ws::Message;
        use futures_util::Stream;
        use serde_json::{json, Value};
        use tokio::sync::mpsc;

        use super::*;
        use crate::datasource::memory::MemoryStore;
        use crate::datasource::{ConnectionContext, Datasource};

        type ClientStream = Pin<Box<dyn Stream<Item = Result<Message, Infallible>> + Send>>;

        struct Client {
            tx: UnboundedSender<Message>,
            rx: UnboundedReceiver<Message>,
            session: JoinHandle<()>,
        }

        impl Client {
            fn send(&self, value: Value) {
                self.tx.send(Message::Text(value.to_string())).unwrap();
            }

            async fn recv(&mut self) -> Value {
                let msg = timeout(Duration::from_secs(5), self.rx.recv())
                    .await
                    .expect("no reply from editor session")
                    .expect("editor session closed");
                match msg {
                    Message::Text(text) => serde_json::from_str(&text).unwrap(),
                    other => panic!("unexpected frame {:?}", other),
                }
            }

            async fn close(self) -> UnboundedReceiver<Message> {
                self.tx.send(Message::Close(None)).unwrap();
                self.session.await.unwrap();
                self.rx
            }
        }

        fn app_state(quiet_period: Duration, dashboards: DashboardManager) -> Arc<AppState> {
            let store = MemoryStore::from_json(json!({
                "users": [
                    { "id": 1, "name": "Eleanora" },
                    { "id": 2, "name": "Janis" },
                    { "id": 3, "name": "Roger" },
                ],
            }))
            .unwrap();
            let ctx = ConnectionContext::new("test").with_emulator("localhost:8765");
            Arc::new(AppState {
                datasource: Datasource::new(ctx, Arc::new(store)),
                dashboards,
                quiet_period,
                start_time: Instant::now(),
            })
        }

        fn connect(state: Arc<AppState>, params: EditorParams) -> Client {
            let (client_tx, client_rx) = mpsc::unbounded_channel::<Message>();
            let (server_tx, server_rx) = mpsc::unbounded_channel::<Message>();

            let stream: ClientStream = Box::pin(futures_util::stream::unfold(
                client_rx,
                |mut rx| async move { rx.recv().await.map(|m| (Ok(m), rx)) },
            ));
            let sink = Box::pin(futures_util::sink::unfold(
                server_tx,
                |tx, msg: Message| async move {
                    tx.send(msg).map_err(|_| ())?;
                    Ok::<_, ()>(tx)
                },
            ));

            Client {
                tx: client_tx,
                rx: server_rx,
                session: tokio::spawn(run_session(sink, stream, state, params)),
            }
        }

        #[tokio::test]
        async fn test_opens_with_default_model() {
            let state = app_state(Duration::from_millis(500), DashboardManager::new());
            let mut client = connect(state, EditorParams::default());

            let first = client.recv().await;
            assert_eq!(first["type"], "model");
            assert_eq!(first["executable"], false);
            client.close().await;
        }

        #[tokio::test]
        async fn test_opens_panel_query() {
            let dashboards = DashboardManager::new();
            let dash = dashboards
                .create(serde_json::from_value(json!({ "name": "Team" })).unwrap())
                .await
                .unwrap();
            dashboards
                .save_panel_query(&dash.id, "p1", QueryModel::structured("users"))
                .await
                .unwrap();
            let state = app_state(Duration::from_millis(500), dashboards);

            let mut client = connect(
                Arc::clone(&state),
                EditorParams {
                    dashboard: Some(dash.id.clone()),
                    panel: Some("p1".into()),
                },
            );
            let first = client.recv().await;
            assert_eq!(first["type"], "model");
            assert_eq!(first["display"], "SELECT * FROM users");
            client.close().await;

            let mut client = connect(
                state,
                EditorParams {
                    dashboard: Some(dash.id),
                    panel: Some("missing".into()),
                },
            );
            assert_eq!(client.recv().await["type"], "error");
            assert_eq!(client.recv().await["type"], "model");
            client.close().await;
        }

        #[tokio::test]
        async fn test_invalid_message_keeps_socket_open() {
            let state = app_state(Duration::from_millis(500), DashboardManager::new());
            let mut client = connect(state, EditorParams::default());
            client.recv().await;

            client.tx.send(Message::Text("not json".into())).unwrap();
            let reply = client.recv().await;
            assert_eq!(reply["type"], "error");
            assert!(reply["message"].as_str().unwrap().starts_with("invalid message"));

            client.send(json!({ "type": "collection", "path": "users" }));
            let reply = client.recv().await;
            assert_eq!(reply["type"], "model");
            assert_eq!(reply["model"]["collectionPath"], "users");
            client.close().await;
        }

        #[tokio::test]
        async fn test_results_pushed_after_execution() {
            let state = app_state(Duration::from_millis(20), DashboardManager::new());
            let mut client = connect(state, EditorParams::default());
            client.recv().await;

            client.send(json!({
                "type": "replace",
                "model": { "collectionPath": "users", "isCount": true },
            }));
            assert_eq!(client.recv().await["type"], "model");

            // debounced run of the replaced model
            let result = client.recv().await;
            assert_eq!(result["type"], "result");
            assert_eq!(result["frames"][0]["fields"][0]["values"][0], json!(3.0));

            client.send(json!({ "type": "run" }));
            assert_eq!(client.recv().await["type"], "result");

            client.send(json!({ "type": "replace", "model": { "query": "drop users" } }));
            assert_eq!(client.recv().await["type"], "model");
            client.send(json!({ "type": "run" }));
            assert_eq!(client.recv().await["type"], "error");
            client.close().await;
        }

        #[tokio::test]
        async fn test_close_cancels_pending_execution() {
            let state = app_state(Duration::from_millis(100), DashboardManager::new());
            let mut client = connect(state, EditorParams::default());
            client.recv().await;

            client.send(json!({ "type": "collection", "path": "users" }));
            assert_eq!(client.recv().await["type"], "model");
            let mut rx = client.close().await;

            tokio::time::sleep(Duration::from_millis(300)).await;
            while let Ok(msg) = rx.try_recv() {
                panic!("message after close: {:?}", msg);
            }
        }
    }

    #[tokio::test]
    async fn test_initial_model_from_params() {
        let dashboards = DashboardManager::new();
        assert_eq!(
            initial_model(&dashboards, &EditorParams::default()).await,
            Ok(QueryModel::default())
        );
        let half = EditorParams {
            dashboard: Some("d".into()),
            panel: None,
        };
        assert!(initial_model(&dashboards, &half).await.is_err());
    }
}
