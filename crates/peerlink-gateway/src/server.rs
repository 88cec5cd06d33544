use crate::error::ApiError;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use peerlink_core::{
    AgentId, AgentTransport, EventBus, EventFilter, PeerlinkError, TaskRequest, TaskState,
};
use peerlink_registry::AgentStore;
use peerlink_scheduler::Scheduler;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared application state behind every handler.
pub struct AppState {
    /// The agent registry.
    pub store: Arc<AgentStore>,
    /// The scheduling engine.
    pub scheduler: Arc<Scheduler>,
    /// Event bus feeding the WebSocket endpoint.
    pub bus: Arc<EventBus>,
    /// Outbound transport, used here to fetch discovery documents.
    pub transport: Arc<dyn AgentTransport>,
}

/// Build the full API route table.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agents", post(register_agent).get(list_agents))
        .route("/api/agents/{id}", get(get_agent).delete(deregister_agent))
        .route("/api/tasks", post(submit_task).get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/stats", get(stats))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "peerlink" }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    /// Base URL of the agent to register.
    url: String,
    /// Replace the stored card if the endpoint is already registered.
    #[serde(default)]
    refresh: bool,
}

/// `POST /api/agents` — fetch the agent's discovery document and admit it.
async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state.transport.fetch_card(&req.url).await?;
    let id = state.store.register(card, req.refresh)?;
    let record = state
        .store
        .get(&id)
        .ok_or(PeerlinkError::AgentNotFound(id))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list())
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = AgentId::from(id.as_str());
    let record = state
        .store
        .get(&id)
        .ok_or(PeerlinkError::AgentNotFound(id))?;
    Ok(Json(record))
}

async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.store.deregister(&AgentId::from(id.as_str()))?;
    Ok(Json(record))
}

/// `POST /api/tasks` — accepted for asynchronous execution, never blocks
/// on routing or dispatch.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.scheduler.submit(req)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": id })),
    ))
}

#[derive(Debug, Deserialize)]
struct TaskListParams {
    state: Option<TaskState>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TaskListParams>,
) -> impl IntoResponse {
    Json(state.scheduler.list(params.state))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .scheduler
        .get(id)
        .ok_or(PeerlinkError::TaskNotFound(id))?;
    Ok(Json(task))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.cancel(id)?;
    let task = state
        .scheduler
        .get(id)
        .ok_or(PeerlinkError::TaskNotFound(id))?;
    Ok(Json(task))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "registry": state.store.stats(),
        "scheduler": state.scheduler.stats(),
        "event_subscribers": state.bus.subscriber_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    tasks: Option<bool>,
    agents: Option<bool>,
    task_id: Option<Uuid>,
}

impl WsParams {
    fn filter(&self) -> EventFilter {
        let defaults = EventFilter::default();
        EventFilter {
            tasks: self.tasks.unwrap_or(defaults.tasks),
            agents: self.agents.unwrap_or(defaults.agents),
            task_id: self.task_id,
        }
    }
}

/// `GET /ws` — live event feed. Query parameters narrow the subscription;
/// lost events surface as `{"type":"gap","missed":n}` markers.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let filter = params.filter();
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, filter: EventFilter) {
    let connection_id = Uuid::new_v4();
    let mut events = state.bus.subscribe_filtered(filter);
    info!(%connection_id, "Event feed connected");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    // The feed is one-way; other frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(%connection_id, "Event feed disconnected");
}
