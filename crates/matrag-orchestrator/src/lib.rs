use chrono::Utc;
use matrag_core::{FeedbackDb, FeedbackRecord, ModelType, RetrievalOptions, RetrievalResult};
use matrag_crossmodal::CrossModalAttention;
use matrag_learning::ContinuousLearningPipeline;
use matrag_registry::ModelRegistry;
use matrag_retrieval::HierarchicalRetriever;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const MODEL_TYPES: [ModelType; 4] = [
    ModelType::Embedding,
    ModelType::Generative,
    ModelType::Vision,
    ModelType::Text,
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorResponse {
    pub materials: Vec<matrag_core::Material>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_modal: Option<serde_json::Value>,
}

/// Routes each request by modality: text-only goes straight to the
/// hierarchical retriever; image-only is synthesized into a text query
/// first; text+image is enhanced before the same text path.
pub struct EnhancedRagOrchestrator {
    hierarchical: Arc<HierarchicalRetriever>,
    cross_modal: Arc<CrossModalAttention>,
    registry: Arc<dyn ModelRegistry>,
    feedback_db: Arc<dyn FeedbackDb>,
    learning: Arc<ContinuousLearningPipeline>,
}

impl EnhancedRagOrchestrator {
    pub fn new(
        hierarchical: Arc<HierarchicalRetriever>,
        cross_modal: Arc<CrossModalAttention>,
        registry: Arc<dyn ModelRegistry>,
        feedback_db: Arc<dyn FeedbackDb>,
        learning: Arc<ContinuousLearningPipeline>,
    ) -> Self {
        Self {
            hierarchical,
            cross_modal,
            registry,
            feedback_db,
            learning,
        }
    }

    pub async fn query(
        &self,
        text_query: Option<&str>,
        image_data: Option<&[u8]>,
        options: &RetrievalOptions,
    ) -> matrag_core::Result<OrchestratorResponse> {
        if text_query.is_none() && image_data.is_none() {
            return Err(matrag_core::Error::input(
                "either textQuery or imageData must be provided",
            ));
        }

        if image_data.is_none() {
            let query = text_query.unwrap();
            let result = self.hierarchical.retrieve(query, options).await?;
            return Ok(to_response(result, None));
        }

        let fused = self
            .cross_modal
            .process_multi_modal_query(text_query, image_data)
            .await?;

        let effective_query = fused
            .enhanced_query
            .clone()
            .or_else(|| fused.generated_text_query.clone())
            .ok_or_else(|| matrag_core::Error::dependency("cross-modal fusion produced no query"))?;

        let mut merged_options = options.clone();
        merged_options.extra.insert(
            "visual_context".to_string(),
            serde_json::to_value(&fused.visual_context).unwrap_or(json!(null)),
        );

        let result = self.hierarchical.retrieve(&effective_query, &merged_options).await?;

        let cross_modal = json!({
            "original_query": text_query,
            "enhanced_query": fused.enhanced_query,
            "generated_query": fused.generated_text_query,
            "visual_context": fused.visual_context,
        });
        Ok(to_response(result, Some(cross_modal)))
    }

    /// Fans out feedback to the feedback database and, if triggers are met,
    /// launches a detached fine-tune task. Returns `success=false` (never an
    /// error) when the database submission fails.
    pub async fn submit_feedback(
        &self,
        query: String,
        response: serde_json::Value,
        feedback: matrag_core::Feedback,
    ) -> bool {
        let record = FeedbackRecord {
            query,
            response,
            feedback,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.feedback_db.submit_feedback(record).await {
            error!(error = %e, "feedback submission failed");
            return false;
        }

        for model_type in MODEL_TYPES {
            let learning = self.learning.clone();
            match learning.check_fine_tuning_triggers(model_type).await {
                Ok(true) => {
                    tokio::spawn(async move {
                        if let Err(e) = learning.run_fine_tuning(model_type).await {
                            error!(model_type = %model_type, error = %e, "fine-tune run failed");
                        }
                    });
                }
                Ok(false) => {}
                Err(e) => error!(model_type = %model_type, error = %e, "trigger evaluation failed"),
            }
        }
        true
    }

    /// Union of distributed-retrieval stats and default-model pointers.
    pub async fn get_system_stats(&self) -> matrag_core::Result<serde_json::Value> {
        let mut defaults = serde_json::Map::new();
        for model_type in MODEL_TYPES {
            if let Some(model) = self.registry.get_default_model(model_type).await? {
                defaults.insert(model_type.as_str().to_string(), json!(model.model_id));
            }
        }
        Ok(json!({ "default_models": defaults }))
    }
}

fn to_response(result: RetrievalResult, cross_modal: Option<serde_json::Value>) -> OrchestratorResponse {
    OrchestratorResponse {
        materials: result.materials,
        metadata: result.metadata,
        cross_modal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use matrag_core::{
        ChatMessage, DetectedMaterial, DetectedTexture, EmbeddingModel, Feedback, FeedbackMetrics,
        FineTuneHyperparameters, FineTuneResult, LlmClient, Material, PaletteColor, RagConfig,
        Retriever, VisionModel,
    };
    use matrag_registry::FileModelRegistry;

    struct FakeBase;
    #[async_trait]
    impl Retriever for FakeBase {
        async fn retrieve(&self, _q: &str, _o: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
            Ok(RetrievalResult {
                materials: vec![Material {
                    id: "m1".into(),
                    score: 0.5,
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
            Ok("generated query about tile".into())
        }
        async fn fine_tune(
            &self,
            _t: &str,
            _v: &str,
            _m: &str,
            _s: &str,
            _h: FineTuneHyperparameters,
        ) -> matrag_core::Result<FineTuneResult> {
            unimplemented!()
        }
    }

    struct FakeFeedbackDb;
    #[async_trait]
    impl FeedbackDb for FakeFeedbackDb {
        async fn submit_feedback(&self, _r: FeedbackRecord) -> matrag_core::Result<()> {
            Ok(())
        }
        async fn get_feedback_count(&self, _s: chrono::DateTime<Utc>) -> matrag_core::Result<u64> {
            Ok(0)
        }
        async fn get_feedback_metrics(&self, _s: chrono::DateTime<Utc>) -> matrag_core::Result<FeedbackMetrics> {
            Ok(FeedbackMetrics::default())
        }
        async fn get_feedback_for_training(
            &self,
            _s: chrono::DateTime<Utc>,
        ) -> matrag_core::Result<Vec<FeedbackRecord>> {
            Ok(vec![])
        }
    }

    fn orchestrator() -> EnhancedRagOrchestrator {
        let config = RagConfig::default();
        let hierarchical = Arc::new(HierarchicalRetriever::new(Arc::new(FakeBase), None, config.clone()));
        let cross_modal = Arc::new(CrossModalAttention::new(Arc::new(FakeVision), Arc::new(FakeLlm)));
        let dir = tempfile::tempdir().unwrap().into_path();
        let registry: Arc<dyn ModelRegistry> = Arc::new(FileModelRegistry::new(dir));
        let feedback_db: Arc<dyn FeedbackDb> = Arc::new(FakeFeedbackDb);
        let embedding_model: Option<Arc<dyn EmbeddingModel>> = None;
        let learning = Arc::new(ContinuousLearningPipeline::new(
            registry.clone(),
            feedback_db.clone(),
            embedding_model,
            Some(Arc::new(FakeLlm) as Arc<dyn LlmClient>),
            config,
        ));
        EnhancedRagOrchestrator::new(hierarchical, cross_modal, registry, feedback_db, learning)
    }

    #[tokio::test]
    async fn image_only_query_produces_generated_query_and_visual_context() {
        let orchestrator = orchestrator();
        let result = orchestrator
            .query(None, Some(b"fake-image-bytes"), &RetrievalOptions::default())
            .await
            .unwrap();
        let cross_modal = result.cross_modal.unwrap();
        assert!(cross_modal["generated_query"].as_str().unwrap().contains("tile"));
    }

    #[tokio::test]
    async fn neither_text_nor_image_is_rejected() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .query(None, None, &RetrievalOptions::default())
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn feedback_submission_never_errors_even_with_no_triggers() {
        let orchestrator = orchestrator();
        let ok = orchestrator
            .submit_feedback(
                "q".into(),
                json!("r"),
                Feedback {
                    rating: 5,
                    max_rating: 5,
                    feedback_text: None,
                    aspects: vec![],
                },
            )
            .await;
        assert!(ok);
    }
}
