use base64::Engine;
use matrag_core::{Error, Feedback, RetrievalOptions};
use matrag_orchestrator::EnhancedRagOrchestrator;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// A bridge request: `requestType` selects the handler, `data` carries its
/// payload. Mirrors the wire shape an external MCP host sends.
#[derive(Debug, Deserialize)]
pub struct BridgeRequest {
    #[serde(rename = "requestType")]
    pub request_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "textQuery", default)]
    text_query: Option<String>,
    #[serde(rename = "imageData", default)]
    image_data: Option<String>,
    #[serde(default)]
    options: Option<RetrievalOptions>,
}

#[derive(Debug, Deserialize)]
struct FeedbackPayload {
    rating: u8,
    #[serde(default)]
    max_rating: Option<u8>,
    #[serde(rename = "feedback_text", default)]
    feedback_text: Option<String>,
    #[serde(default)]
    aspects: Vec<matrag_core::FeedbackAspectScore>,
}

#[derive(Debug, Deserialize)]
struct FeedbackData {
    query: String,
    response: Value,
    feedback: FeedbackPayload,
}

/// Stateless request dispatcher. Holds a handle to the orchestrator set once
/// at startup by `initialize`; every `dispatch` call is otherwise
/// independent and carries no per-request state of its own.
pub struct RagBridge {
    orchestrator: RwLock<Option<Arc<EnhancedRagOrchestrator>>>,
}

impl Default for RagBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl RagBridge {
    pub fn new() -> Self {
        Self {
            orchestrator: RwLock::new(None),
        }
    }

    pub async fn initialize(&self, orchestrator: Arc<EnhancedRagOrchestrator>) {
        *self.orchestrator.write().await = Some(orchestrator);
        info!("rag bridge initialized");
    }

    /// Never returns an `Err` to the caller — every failure is translated
    /// into a `{status: "error", error}` envelope per the bridge's error
    /// propagation policy.
    pub async fn dispatch(&self, request: BridgeRequest) -> Value {
        match request.request_type.as_str() {
            "query" => self.handle_query(request.data).await,
            "feedback" => self.handle_feedback(request.data).await,
            "stats" => self.handle_stats().await,
            other => error_envelope(&Error::input(format!("unknown requestType: {other}"))),
        }
    }

    async fn orchestrator(&self) -> Result<Arc<EnhancedRagOrchestrator>, Error> {
        self.orchestrator
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::state("bridge not initialized"))
    }

    async fn handle_query(&self, data: Value) -> Value {
        let orchestrator = match self.orchestrator().await {
            Ok(o) => o,
            Err(e) => return error_envelope(&e),
        };
        let parsed: QueryData = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => return error_envelope(&Error::input(format!("malformed query request: {e}"))),
        };
        let image_bytes = match parsed.image_data.as_deref().map(decode_image) {
            Some(Ok(bytes)) => Some(bytes),
            Some(Err(e)) => return error_envelope(&e),
            None => None,
        };
        let options = parsed.options.unwrap_or_default();

        match orchestrator
            .query(parsed.text_query.as_deref(), image_bytes.as_deref(), &options)
            .await
        {
            Ok(response) => {
                let mut envelope = json!({
                    "materials": response.materials,
                    "metadata": response.metadata,
                    "status": "success",
                });
                if let Some(cross_modal) = response.cross_modal {
                    envelope["cross_modal"] = cross_modal;
                }
                envelope
            }
            Err(e) => {
                error!(error = %e, "query dispatch failed");
                error_envelope(&e)
            }
        }
    }

    async fn handle_feedback(&self, data: Value) -> Value {
        let orchestrator = match self.orchestrator().await {
            Ok(o) => o,
            Err(e) => return error_envelope(&e),
        };
        let parsed: FeedbackData = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => return error_envelope(&Error::input(format!("malformed feedback request: {e}"))),
        };
        let feedback = Feedback {
            rating: parsed.feedback.rating,
            max_rating: parsed.feedback.max_rating.unwrap_or(5),
            feedback_text: parsed.feedback.feedback_text,
            aspects: parsed.feedback.aspects,
        };
        let success = orchestrator
            .submit_feedback(parsed.query, parsed.response, feedback)
            .await;
        json!({ "success": success, "status": "success" })
    }

    async fn handle_stats(&self) -> Value {
        let orchestrator = match self.orchestrator().await {
            Ok(o) => o,
            Err(e) => return error_envelope(&e),
        };
        match orchestrator.get_system_stats().await {
            Ok(mut stats) => {
                if let Value::Object(map) = &mut stats {
                    map.insert("status".to_string(), json!("success"));
                }
                stats
            }
            Err(e) => {
                error!(error = %e, "stats dispatch failed");
                error_envelope(&e)
            }
        }
    }
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::input(format!("invalid base64 imageData: {e}")))
}

fn error_envelope(error: &Error) -> Value {
    json!({
        "status": "error",
        "error": error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use matrag_core::{
        ChatMessage, DetectedMaterial, DetectedTexture, FeedbackDb, FeedbackMetrics, FeedbackRecord,
        FineTuneHyperparameters, FineTuneResult, LlmClient, Material, PaletteColor, RagConfig,
        Retriever, RetrievalResult, VisionModel,
    };
    use matrag_crossmodal::CrossModalAttention;
    use matrag_learning::ContinuousLearningPipeline;
    use matrag_registry::FileModelRegistry;
    use matrag_retrieval::HierarchicalRetriever;
    use chrono::{DateTime, Utc};

    struct FakeBase;
    #[async_trait]
    impl Retriever for FakeBase {
        async fn retrieve(&self, _q: &str, _o: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
            Ok(RetrievalResult {
                materials: vec![Material {
                    id: "m1".into(),
                    score: 0.9,
                    ..Default::default()
                }],
                metadata: Default::default(),
            })
        }
    }

    struct FakeVision;
    #[async_trait]
    impl VisionModel for FakeVision {
        async fn extract_features(&self, _b: &[u8]) -> matrag_core::Result<Vec<f32>> {
            Ok(vec![])
        }
        async fn detect_materials(&self, _b: &[u8]) -> matrag_core::Result<Vec<DetectedMaterial>> {
            Ok(vec![])
        }
        async fn analyze_colors(&self, _b: &[u8]) -> matrag_core::Result<Vec<PaletteColor>> {
            Ok(vec![])
        }
        async fn analyze_textures(&self, _b: &[u8]) -> matrag_core::Result<Vec<DetectedTexture>> {
            Ok(vec![])
        }
    }

    struct FakeLlm;
    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn chat(&self, _m: &str, _msgs: &[ChatMessage], _t: f32, _mt: u32) -> matrag_core::Result<String> {
            Ok("ok".into())
        }
        async fn fine_tune(
            &self,
            _t: &str,
            _v: &str,
            model: &str,
            _s: &str,
            _h: FineTuneHyperparameters,
        ) -> matrag_core::Result<FineTuneResult> {
            Ok(FineTuneResult {
                fine_tuned_model: format!("{model}-ft"),
            })
        }
    }

    struct FakeFeedbackDb;
    #[async_trait]
    impl FeedbackDb for FakeFeedbackDb {
        async fn submit_feedback(&self, _r: FeedbackRecord) -> matrag_core::Result<()> {
            Ok(())
        }
        async fn get_feedback_count(&self, _s: DateTime<Utc>) -> matrag_core::Result<u64> {
            Ok(0)
        }
        async fn get_feedback_metrics(&self, _s: DateTime<Utc>) -> matrag_core::Result<FeedbackMetrics> {
            Ok(FeedbackMetrics::default())
        }
        async fn get_feedback_for_training(&self, _s: DateTime<Utc>) -> matrag_core::Result<Vec<FeedbackRecord>> {
            Ok(vec![])
        }
    }

    async fn bridge() -> RagBridge {
        let config = RagConfig::default();
        let hierarchical = Arc::new(HierarchicalRetriever::new(Arc::new(FakeBase), None, config.clone()));
        let cross_modal = Arc::new(CrossModalAttention::new(Arc::new(FakeVision), Arc::new(FakeLlm)));
        let dir = tempfile::tempdir().unwrap().into_path();
        let registry: Arc<dyn matrag_registry::ModelRegistry> = Arc::new(FileModelRegistry::new(dir));
        let feedback_db: Arc<dyn FeedbackDb> = Arc::new(FakeFeedbackDb);
        let learning = Arc::new(ContinuousLearningPipeline::new(
            registry.clone(),
            feedback_db.clone(),
            None,
            Some(Arc::new(FakeLlm) as Arc<dyn LlmClient>),
            config,
        ));
        let orchestrator = Arc::new(EnhancedRagOrchestrator::new(
            hierarchical,
            cross_modal,
            registry,
            feedback_db,
            learning,
        ));
        let bridge = RagBridge::new();
        bridge.initialize(orchestrator).await;
        bridge
    }

    #[tokio::test]
    async fn uninitialized_bridge_returns_state_error() {
        let bridge = RagBridge::new();
        let response = bridge
            .dispatch(BridgeRequest {
                request_type: "stats".into(),
                data: Value::Null,
            })
            .await;
        assert_eq!(response["status"], "error");
        assert!(response["error"].as_str().unwrap().contains("not initialized"));
    }

    #[tokio::test]
    async fn unknown_request_type_is_an_error_envelope() {
        let bridge = bridge().await;
        let response = bridge
            .dispatch(BridgeRequest {
                request_type: "bogus".into(),
                data: Value::Null,
            })
            .await;
        assert_eq!(response["status"], "error");
    }

    #[tokio::test]
    async fn query_dispatch_returns_materials_on_success() {
        let bridge = bridge().await;
        let response = bridge
            .dispatch(BridgeRequest {
                request_type: "query".into(),
                data: json!({ "textQuery": "oak flooring" }),
            })
            .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["materials"][0]["id"], "m1");
    }

    #[tokio::test]
    async fn feedback_dispatch_reports_success() {
        let bridge = bridge().await;
        let response = bridge
            .dispatch(BridgeRequest {
                request_type: "feedback".into(),
                data: json!({
                    "query": "oak flooring",
                    "response": {"materials": []},
                    "feedback": {"rating": 4},
                }),
            })
            .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["success"], true);
    }

    #[tokio::test]
    async fn stats_dispatch_merges_default_models_with_status() {
        let bridge = bridge().await;
        let response = bridge
            .dispatch(BridgeRequest {
                request_type: "stats".into(),
                data: Value::Null,
            })
            .await;
        assert_eq!(response["status"], "success");
        assert!(response.get("default_models").is_some());
    }
}
