//! Gateway server wiring: stores, registry, dispatcher, router

use crate::routes;
use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use weaver_llm::{AnthropicProvider, LlmProvider};
use weaver_runs::{RunDispatcher, RunLog};
use weaver_store::{AgentStore, RunStore, ThreadStore, VersionStore};
use weaver_tools::{create_default_registry, CapabilityRegistry};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub anthropic_api_key: Option<String>,
    pub default_model: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8321,
            bind: "127.0.0.1".to_string(),
            anthropic_api_key: None,
            default_model: None,
        }
    }
}

pub struct AppState {
    pub agents: Arc<AgentStore>,
    pub versions: Arc<VersionStore>,
    pub threads: Arc<ThreadStore>,
    pub dispatcher: Arc<RunDispatcher>,
    pub registry: Arc<CapabilityRegistry>,
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let api_key = config
        .anthropic_api_key
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

    // If ANTHROPIC_API_URL is set, use it as the base URL (proxy setups)
    let provider: Arc<dyn LlmProvider> = if let Ok(api_url) = std::env::var("ANTHROPIC_API_URL") {
        info!("Using custom API URL: {}/v1/messages", api_url);
        Arc::new(AnthropicProvider::new(&api_key).with_base_url(format!("{}/v1/messages", api_url)))
    } else {
        Arc::new(AnthropicProvider::new(&api_key))
    };

    let registry = Arc::new(create_default_registry());
    info!("Registered capabilities: {:?}", registry.list());

    let agents = Arc::new(AgentStore::new());
    let versions = Arc::new(VersionStore::new(agents.clone()));
    let threads = Arc::new(ThreadStore::new());
    let runs = Arc::new(RunStore::new());
    let log = Arc::new(RunLog::new());

    let default_model = config
        .default_model
        .or_else(|| std::env::var("WEAVER_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let dispatcher = Arc::new(RunDispatcher::new(
        provider,
        registry.clone(),
        agents.clone(),
        versions.clone(),
        threads.clone(),
        runs,
        log,
        default_model.as_str(),
    ));

    let state = Arc::new(AppState {
        agents,
        versions,
        threads,
        dispatcher,
        registry,
    });

    let app = router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    info!("Weaver Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Default model: {}", default_model);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/capabilities", get(routes::list_capabilities))
        .route("/agents", post(routes::create_agent).get(routes::list_agents))
        .route(
            "/agents/:agent_id",
            get(routes::get_agent)
                .put(routes::update_agent)
                .delete(routes::delete_agent),
        )
        .route("/agents/:agent_id/tools", put(routes::update_agent_tools))
        .route(
            "/agents/:agent_id/versions",
            post(routes::create_version).get(routes::list_versions),
        )
        .route(
            "/agents/:agent_id/versions/:version_id/activate",
            post(routes::activate_version),
        )
        .route(
            "/versions/:version_id",
            get(routes::get_version).put(routes::update_version_metadata),
        )
        .route("/threads", post(routes::create_thread))
        .route("/threads/:thread_id", get(routes::get_thread))
        .route("/threads/:thread_id/messages", get(routes::list_messages))
        .route("/threads/:thread_id/runs", get(routes::list_runs))
        .route("/runs/start", post(routes::start_run))
        .route("/runs/:run_id", get(routes::get_run))
        .route("/runs/:run_id/stop", post(routes::stop_run))
        .route("/runs/:run_id/stream", get(routes::stream_run))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
