use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tabcap_engine::core::EngineEvent;
use tabcap_proto::protocol::{Command, EngineState, TabId, MAX_CAP};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state: Arc<RwLock<EngineState>>,
    event_tx: mpsc::Sender<EngineEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: Arc<RwLock<EngineState>>,
    event_tx: mpsc::Sender<EngineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app_state = HttpState { state, event_tx };

        // Permissive CORS: the extension bridge calls from its own origin
        let app = Router::new()
            .route("/api/state", get(get_state))
            .route("/api/tabs/:tab/start/:stream", post(start_tab))
            .route("/api/tabs/:tab/stop", post(stop_tab))
            .route("/api/tabs/:tab/cap/:value", post(set_cap))
            .route("/api/tabs/:tab/visual/:hidden", post(toggle_visual))
            .route("/api/tabs/:tab/remove", post(remove_tab))
            .layer(CorsLayer::permissive())
            .with_state(app_state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<EngineState> {
    let snapshot = state.state.read().await.clone();
    Json(snapshot)
}

async fn start_tab(
    State(state): State<HttpState>,
    Path((tab, stream)): Path<(TabId, String)>,
) -> StatusCode {
    info!("HTTP API: Start tab {} on '{}'", tab, stream);
    let cmd = Command::Start {
        tab_id: tab,
        stream_id: stream,
    };
    send_command(&state, cmd).await
}

async fn stop_tab(State(state): State<HttpState>, Path(tab): Path<TabId>) -> StatusCode {
    info!("HTTP API: Stop tab {}", tab);
    send_command(&state, Command::Stop { tab_id: tab }).await
}

async fn set_cap(
    State(state): State<HttpState>,
    Path((tab, value)): Path<(TabId, u16)>,
) -> StatusCode {
    if value > MAX_CAP {
        info!("HTTP API: Rejected cap {} for tab {}", value, tab);
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    info!("HTTP API: Set cap {} for tab {}", value, tab);
    send_command(
        &state,
        Command::SetCap {
            tab_id: tab,
            cap: value,
        },
    )
    .await
}

async fn toggle_visual(
    State(state): State<HttpState>,
    Path((tab, hidden)): Path<(TabId, bool)>,
) -> StatusCode {
    info!("HTTP API: Tab {} visuals hidden={}", tab, hidden);
    send_command(
        &state,
        Command::ToggleVisual {
            tab_id: tab,
            hidden,
        },
    )
    .await
}

/// The bridge calls this when a browser tab closes.
async fn remove_tab(State(state): State<HttpState>, Path(tab): Path<TabId>) -> StatusCode {
    info!("HTTP API: Remove tab {}", tab);
    send_command(&state, Command::Remove { tab_id: tab }).await
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(EngineEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to send command to engine");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}
