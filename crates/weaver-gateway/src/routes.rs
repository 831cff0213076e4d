//! Route handlers
//!
//! Thin translation between HTTP and the stores/dispatcher. Caller identity
//! arrives as an opaque account id in the `X-Account-Id` header; verifying
//! it is the deployment's concern, ownership checks happen in the stores.

use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;
use weaver_core::{AgentId, Error, RunId, ThreadId, VersionId};
use weaver_store::{AgentUpdate, CreateVersion};

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::MalformedToolInvocation(_) => StatusCode::BAD_REQUEST,
            Error::PersistenceFailure(_)
            | Error::ModelCall { .. }
            | Error::Json(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn account_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("x-account-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| ApiError(Error::unauthorized("missing X-Account-Id header")))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Metadata for every registered capability, as the model sees it.
pub async fn list_capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "capabilities": state.registry.metadata() }))
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Option<weaver_core::ToolConfig>,
}

/// Create an agent together with its activated v1. If the initial version
/// cannot be created the agent record is rolled back, so a partially
/// configured agent is never reachable.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let agent = state.agents.create(&account_id, &request.name);

    let version = state
        .versions
        .create_version(
            &agent.agent_id,
            &account_id,
            CreateVersion {
                system_prompt: request
                    .system_prompt
                    .unwrap_or_else(|| "You are a helpful assistant.".to_string()),
                model: request.model,
                tools: request.tools.unwrap_or_default(),
                version_name: Some("v1".to_string()),
                change_description: Some("Initial version".to_string()),
            },
        )
        .and_then(|version| {
            state
                .versions
                .activate_version(&agent.agent_id, &version.version_id, &account_id)
                .map(|_| version)
        });

    let version = match version {
        Ok(v) => v,
        Err(e) => {
            error!(agent_id = %agent.agent_id, "failed to create initial version, rolling back agent: {}", e);
            state.agents.remove_unchecked(&agent.agent_id);
            return Err(e.into());
        }
    };

    let agent = state.agents.get(&agent.agent_id)?;
    Ok(Json(json!({ "agent": agent, "version": version })))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    Ok(Json(json!({ "agents": state.agents.list_for_account(&account_id) })))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let agent = state
        .agents
        .get_owned(&AgentId::new(agent_id), &account_id)?;
    Ok(Json(json!({ "agent": agent })))
}

pub async fn update_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(update): Json<AgentUpdate>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let agent = state
        .agents
        .update(&AgentId::new(agent_id), &account_id, update)?;
    Ok(Json(json!({ "agent": agent })))
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    state.agents.delete(&AgentId::new(agent_id), &account_id)?;
    Ok(Json(json!({ "message": "Agent deleted successfully" })))
}

#[derive(Deserialize)]
pub struct UpdateToolsRequest {
    #[serde(flatten)]
    pub tools: weaver_core::ToolConfig,
}

/// Replace the agent's tool configuration by creating and activating a new
/// version that carries the current prompt and model forward.
pub async fn update_agent_tools(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(request): Json<UpdateToolsRequest>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let agent_id = AgentId::new(agent_id);

    let active = state.versions.active_version(&agent_id, &account_id)?;
    let new_version = state.versions.create_version(
        &agent_id,
        &account_id,
        CreateVersion {
            system_prompt: active.system_prompt.clone(),
            model: active.model.clone(),
            tools: request.tools,
            version_name: None,
            change_description: Some("Updated agent tools".to_string()),
        },
    )?;
    state
        .versions
        .activate_version(&agent_id, &new_version.version_id, &account_id)?;

    Ok(Json(json!({ "success": true, "new_version_id": new_version.version_id })))
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

pub async fn create_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(params): Json<CreateVersion>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let version = state
        .versions
        .create_version(&AgentId::new(agent_id), &account_id, params)?;
    Ok(Json(json!({ "version": version })))
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let versions = state
        .versions
        .list_versions(&AgentId::new(agent_id), &account_id)?;
    Ok(Json(json!({ "versions": versions })))
}

pub async fn get_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(version_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let version = state
        .versions
        .get_version(&VersionId::new(version_id), &account_id)?;
    Ok(Json(json!({ "version": version })))
}

pub async fn activate_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((agent_id, version_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    state.versions.activate_version(
        &AgentId::new(agent_id),
        &VersionId::new(version_id),
        &account_id,
    )?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct UpdateVersionRequest {
    pub version_name: Option<String>,
    pub change_description: Option<String>,
}

pub async fn update_version_metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(version_id): Path<String>,
    Json(request): Json<UpdateVersionRequest>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let version = state.versions.update_version_metadata(
        &VersionId::new(version_id),
        &account_id,
        request.version_name,
        request.change_description,
    )?;
    Ok(Json(json!({ "version": version })))
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<CreateThreadRequest>>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let metadata = body.and_then(|Json(b)| b.metadata);
    let thread = state.threads.create(&account_id, metadata);
    Ok(Json(json!({ "thread_id": thread.thread_id })))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let thread = state
        .threads
        .get_owned(&ThreadId::new(thread_id), &account_id)?;
    Ok(Json(json!({ "thread": thread })))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let thread_id = ThreadId::new(thread_id);
    state.threads.get_owned(&thread_id, &account_id)?;
    Ok(Json(json!({ "messages": state.threads.list_messages(&thread_id) })))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct StartRunRequest {
    pub thread_id: String,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default)]
    pub model_name: Option<String>,
}

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StartRunRequest>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let record = state.dispatcher.start_run(weaver_runs::StartRun {
        thread_id: ThreadId::new(request.thread_id),
        agent_id: AgentId::new(request.agent_id),
        account_id,
        prompt: request.prompt,
        model: request.model_name,
    })?;
    Ok(Json(json!({
        "thread_id": record.thread_id,
        "agent_run_id": record.run_id,
        "status": "running",
    })))
}

pub async fn stop_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    state.dispatcher.stop_run(&RunId::new(run_id), &account_id)?;
    Ok(Json(json!({ "status": "stopped" })))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let record = state.dispatcher.get_run(&RunId::new(run_id), &account_id)?;
    Ok(Json(json!({ "agent_run": record })))
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let account_id = account_id(&headers)?;
    let thread_id = ThreadId::new(thread_id);
    state.threads.get_owned(&thread_id, &account_id)?;
    Ok(Json(json!({ "agent_runs": state.dispatcher.runs().list_for_thread(&thread_id) })))
}

#[derive(Deserialize, Default)]
pub struct StreamParams {
    #[serde(default)]
    pub offset: usize,
}

/// Stream a run's events as SSE frames. A terminal `status` event is
/// end-of-stream.
pub async fn stream_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let account_id = account_id(&headers)?;
    let events = weaver_runs::stream_run(
        state.dispatcher.runs().clone(),
        state.dispatcher.threads().clone(),
        state.dispatcher.log().clone(),
        RunId::new(run_id),
        &account_id,
        params.offset,
    )?;
    let frames = events.map(|json| Ok(Event::default().data(json)));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}
