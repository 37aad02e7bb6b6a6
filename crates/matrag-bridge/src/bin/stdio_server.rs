use clap::Parser;
use matrag_bridge::{BridgeRequest, RagBridge};
use rmcp::{
    handler::server::tool::ToolRouter, model::*, tool, tool_handler, tool_router,
    transport::stdio, ServerHandler, ServiceExt,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Optional TOML config file for RagConfig
    #[arg(long)]
    config: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct RagRequestArgs {
    /// Raw bridge request body as a JSON string.
    request: String,
}

#[derive(Clone)]
struct RagMcpServer {
    bridge: Arc<RagBridge>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RagMcpServer {
    fn new(bridge: Arc<RagBridge>) -> Self {
        Self {
            bridge,
            tool_router: Self::tool_router(),
        }
    }

    /// Dispatches one `{requestType, data}` request to the materials RAG
    /// orchestrator and returns its JSON envelope verbatim.
    #[tool(description = "Send a query/feedback/stats request to the materials RAG bridge")]
    async fn rag_request(
        &self,
        rmcp::handler::server::tool::Parameters(args): rmcp::handler::server::tool::Parameters<
            RagRequestArgs,
        >,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let parsed: BridgeRequest = match serde_json::from_str(&args.request) {
            Ok(r) => r,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "malformed bridge request: {e}"
                ))]))
            }
        };
        let response = self.bridge.dispatch(parsed).await;
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string()),
        )]))
    }
}

#[tool_handler]
impl ServerHandler for RagMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "matrag-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Exposes the materials RAG orchestrator over a single rag_request tool".to_string(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = matrag_core::RagConfig::load(args.config.as_deref())?;
    let bridge = Arc::new(RagBridge::new());
    bridge.initialize(matrag_runtime::build_orchestrator(config).await?).await;

    let server = RagMcpServer::new(bridge);
    let running = server.serve(stdio()).await?;
    running.waiting().await?;
    Ok(())
}

/// Wires the orchestrator's collaborator-backed implementations together.
/// Left as its own module so both the stdio and http binaries share it.
mod matrag_runtime {
    use super::*;
    use matrag_core::{Error, RagConfig};
    use matrag_orchestrator::EnhancedRagOrchestrator;

    /// Placeholder: in a deployed bridge this resolves concrete
    /// embedding/vision/LLM/store collaborators from `config`. Returns a
    /// dependency error until those bindings are supplied by the host
    /// application, matching the "external collaborator" boundary in
    /// the interface spec.
    pub async fn build_orchestrator(
        _config: RagConfig,
    ) -> anyhow::Result<Arc<EnhancedRagOrchestrator>> {
        Err(Error::dependency(
            "no collaborator bindings configured; wire vector stores, models and feedback DB before serving",
        )
        .into())
    }
}
