use crate::error::Result;
use crate::types::RetrievalResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Options accompanying a retrieval call. `user_id` is excluded from cache
/// key derivation by contract (`matrag_cache::cache_key`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RetrievalOptions {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

/// Any backend satisfying the vector-retrieve contract; the system treats
/// each store as opaque.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn store_id(&self) -> &str;
    async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> Result<RetrievalResult>;
}

/// Anything that can answer `retrieve` the way the distributed retriever
/// does — lets the hierarchical retriever fan out over either the
/// distributed retriever or a bare `VectorStore` in tests.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> Result<RetrievalResult>;
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn extract_features(&self, text: &str) -> Result<Vec<f32>>;

    async fn fine_tune(
        &self,
        train_data: &[Value],
        val_data: &[Value],
        output_path: &str,
        epochs: u32,
        batch_size: u32,
        learning_rate: f64,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DetectedMaterial {
    pub name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PaletteColor {
    pub name: String,
    pub hex: String,
    pub percentage: f32,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DetectedTexture {
    pub name: String,
    pub confidence: f32,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn extract_features(&self, image_bytes: &[u8]) -> Result<Vec<f32>>;
    async fn detect_materials(&self, image_bytes: &[u8]) -> Result<Vec<DetectedMaterial>>;
    async fn analyze_colors(&self, image_bytes: &[u8]) -> Result<Vec<PaletteColor>>;
    async fn analyze_textures(&self, image_bytes: &[u8]) -> Result<Vec<DetectedTexture>>;
}

#[async_trait]
pub trait TextModel: Send + Sync {
    async fn extract_features(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FineTuneHyperparameters {
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FineTuneResult {
    pub fine_tuned_model: String,
}

/// Chat + fine-tune capable LLM client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    async fn fine_tune(
        &self,
        training_file: &str,
        validation_file: &str,
        model: &str,
        suffix: &str,
        hyperparameters: FineTuneHyperparameters,
    ) -> Result<FineTuneResult>;
}

#[async_trait]
pub trait FeedbackDb: Send + Sync {
    async fn submit_feedback(&self, record: crate::types::FeedbackRecord) -> Result<()>;
    async fn get_feedback_count(&self, since: DateTime<Utc>) -> Result<u64>;
    async fn get_feedback_metrics(&self, since: DateTime<Utc>) -> Result<FeedbackMetrics>;
    async fn get_feedback_for_training(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<crate::types::FeedbackRecord>>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FeedbackMetrics {
    pub count: u64,
    pub mean_rating_normalized: f64,
}
