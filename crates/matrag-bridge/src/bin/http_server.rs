use axum::{extract::State, routing::post, Json, Router};
use clap::Parser;
use matrag_bridge::{BridgeRequest, RagBridge};
use matrag_core::{Error, RagConfig};
use matrag_orchestrator::EnhancedRagOrchestrator;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = RagConfig::load(args.config.as_deref())?;
    let bridge = Arc::new(RagBridge::new());
    bridge.initialize(build_orchestrator(config).await?).await;

    let app = Router::new()
        .route("/rag", post(handle_request))
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .with_state(bridge);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "matrag http bridge listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_request(
    State(bridge): State<Arc<RagBridge>>,
    Json(request): Json<BridgeRequest>,
) -> Json<serde_json::Value> {
    Json(bridge.dispatch(request).await)
}

/// See the stdio binary's `matrag_runtime::build_orchestrator` for the same
/// unresolved-collaborator placeholder; both binaries require a host
/// application to wire concrete vector stores, models and a feedback DB.
async fn build_orchestrator(_config: RagConfig) -> anyhow::Result<Arc<EnhancedRagOrchestrator>> {
    Err(Error::dependency(
        "no collaborator bindings configured; wire vector stores, models and feedback DB before serving",
    )
    .into())
}
