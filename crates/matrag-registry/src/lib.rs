mod file_backend;

pub use file_backend::FileModelRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matrag_core::{AbTest, Error, ModelEntry, ModelId, ModelType, Result, VariantResult};
use std::collections::HashMap;

/// Authoritative store of `ModelEntry` / `AbTest` / default-model pointers.
/// Implementations must be atomic per artifact and tolerate missing
/// artifacts by treating them as empty.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn register_model(
        &self,
        model_id: ModelId,
        model_type: ModelType,
        model_path: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    async fn get_model(&self, model_id: &str) -> Result<Option<ModelEntry>>;

    async fn get_latest_models(&self, model_type: ModelType, limit: usize) -> Result<Vec<ModelEntry>>;

    async fn update_model_performance(
        &self,
        model_id: &str,
        metrics: HashMap<String, f64>,
    ) -> Result<()>;

    async fn register_ab_test(&self, config: AbTest) -> Result<()>;

    async fn update_ab_test_results(
        &self,
        id: &str,
        results: HashMap<ModelId, VariantResult>,
        status: Option<matrag_core::AbTestStatus>,
    ) -> Result<()>;

    async fn get_ab_test(&self, id: &str) -> Result<Option<AbTest>>;

    async fn set_default_model(&self, model_type: ModelType, model_id: &str) -> Result<()>;

    async fn get_default_model(&self, model_type: ModelType) -> Result<Option<ModelEntry>>;
}

/// Shared validation: duplicate registrations are rejected, `registered_date`
/// must be monotonic within the log, referenced models in an A/B test must
/// exist and match type.
pub(crate) fn validate_duplicate(existing: Option<&ModelEntry>) -> Result<()> {
    if existing.is_some() {
        return Err(Error::input("duplicate model_id"));
    }
    Ok(())
}

pub(crate) fn stamp_performance(
    entry: &mut ModelEntry,
    metrics: HashMap<String, f64>,
    now: DateTime<Utc>,
) {
    for (k, v) in metrics {
        entry.performance.metrics.insert(k, v);
    }
    entry.performance.last_updated = Some(now);
}
