use crate::state::{PipelineState, PipelineStateTable};
use chrono::{DateTime, Utc};
use matrag_core::{
    AbTest, AbTestStatus, EmbeddingModel, Error, FeedbackDb, LlmClient, ModelType, RagConfig,
    Result, VariantResult,
};
use matrag_registry::ModelRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Converts accumulated feedback into new model versions and promotes
/// winners, one independent state machine per model role.
pub struct ContinuousLearningPipeline {
    registry: Arc<dyn ModelRegistry>,
    feedback_db: Arc<dyn FeedbackDb>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RagConfig,
    state: PipelineStateTable,
}

impl ContinuousLearningPipeline {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        feedback_db: Arc<dyn FeedbackDb>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
        llm: Option<Arc<dyn LlmClient>>,
        config: RagConfig,
    ) -> Self {
        Self {
            registry,
            feedback_db,
            embedding_model,
            llm,
            config,
            state: PipelineStateTable::new(),
        }
    }

    pub fn state_of(&self, model_type: ModelType) -> PipelineState {
        self.state.get(model_type)
    }

    /// Satisfied when: elapsed time since the last registered model of this
    /// type >= `fine_tuning_interval_days`, feedback count in the window is
    /// at least `min_feedback_samples`, and mean normalized rating is at or
    /// below `feedback_threshold` (room to improve).
    pub async fn check_fine_tuning_triggers(&self, model_type: ModelType) -> Result<bool> {
        let since = self.window_start(model_type).await?;

        let interval_elapsed = match self.registry.get_latest_models(model_type, 1).await?.first() {
            Some(latest) => {
                Utc::now() - latest.registered_date
                    >= chrono::Duration::days(self.config.fine_tuning_interval_days)
            }
            None => true,
        };

        let count = self.feedback_db.get_feedback_count(since).await?;
        let metrics = self.feedback_db.get_feedback_metrics(since).await?;

        Ok(interval_elapsed
            && count >= self.config.min_feedback_samples
            && metrics.mean_rating_normalized <= self.config.feedback_threshold)
    }

    async fn window_start(&self, model_type: ModelType) -> Result<DateTime<Utc>> {
        Ok(self
            .registry
            .get_latest_models(model_type, 1)
            .await?
            .first()
            .map(|m| m.registered_date)
            .unwrap_or_else(|| Utc::now() - chrono::Duration::days(365 * 10)))
    }

    /// Runs the full fine-tune -> register -> A/B workflow for a model
    /// type. Refuses to start a second run while the state machine is not
    /// `Idle`. Any failure resets to `Idle` and leaves the registry
    /// unchanged up to that point.
    pub async fn run_fine_tuning(&self, model_type: ModelType) -> Result<String> {
        if !self.state.is_idle(model_type) {
            return Err(Error::state(format!(
                "fine-tune already in flight for {model_type}"
            )));
        }
        self.state.set(model_type, PipelineState::BuildingDataset);

        let result = self.run_fine_tuning_inner(model_type).await;
        match &result {
            Ok(_) => {}
            Err(e) => {
                warn!(model_type = %model_type, error = %e, "fine-tune run failed, resetting to idle");
                self.state.reset_to_idle(model_type);
            }
        }
        result
    }

    async fn run_fine_tuning_inner(&self, model_type: ModelType) -> Result<String> {
        let since = self.window_start(model_type).await?;
        let feedback = self.feedback_db.get_feedback_for_training(since).await?;
        if feedback.is_empty() {
            return Err(Error::dependency("no feedback available to build a dataset"));
        }
        let split_at = ((feedback.len() as f64) * (1.0 - self.config.test_size)) as usize;
        let (train, val) = feedback.split_at(split_at.min(feedback.len()));

        let dir = tempfile_dataset_dir()?;
        let dataset_hash = materialize_dataset(&dir, train, val)?;

        let parent = self.registry.get_default_model(model_type).await?;

        self.state.set(model_type, PipelineState::FineTuning);
        let output_path = format!("{}/model.bin", dir.display());
        let train_values: Vec<serde_json::Value> =
            train.iter().map(|f| serde_json::to_value(f).unwrap()).collect();
        let val_values: Vec<serde_json::Value> =
            val.iter().map(|f| serde_json::to_value(f).unwrap()).collect();

        let new_model_path = self
            .launch_fine_tune(model_type, &train_values, &val_values, &output_path)
            .await?;

        let mut metadata = HashMap::new();
        if let Some(parent) = &parent {
            metadata.insert("parent_model_id".to_string(), serde_json::json!(parent.model_id));
        }
        metadata.insert("sample_count".to_string(), serde_json::json!(feedback.len()));
        metadata.insert("dataset_hash".to_string(), serde_json::json!(dataset_hash));

        let new_model_id = format!("{}-{}", model_type.as_str(), Uuid::new_v4());
        self.registry
            .register_model(new_model_id.clone(), model_type, new_model_path, metadata)
            .await?;
        self.state.set(model_type, PipelineState::Registered);

        let comparators = self
            .registry
            .get_latest_models(model_type, self.config.models_to_compare.saturating_sub(1))
            .await?;
        let mut variants = vec![new_model_id.clone()];
        variants.extend(comparators.into_iter().map(|m| m.model_id));
        if variants.len() < 2 {
            info!(model_type = %model_type, "not enough comparators to open an A/B test; registered only");
            self.state.reset_to_idle(model_type);
            return Ok(new_model_id);
        }
        let split = 1.0 / variants.len() as f64;
        let traffic_split = vec![split; variants.len()];
        let ab_id = format!("ab-{}", Uuid::new_v4());
        let test = AbTest {
            id: ab_id.clone(),
            start_date: Utc::now(),
            end_date: Utc::now() + chrono::Duration::days(self.config.ab_test_duration_days),
            variants,
            traffic_split,
            status: AbTestStatus::Planned,
            results: Default::default(),
        };
        self.registry.register_ab_test(test).await?;
        self.registry
            .update_ab_test_results(&ab_id, HashMap::new(), Some(AbTestStatus::Running))
            .await?;
        self.state.set(model_type, PipelineState::ABTesting);

        Ok(new_model_id)
    }

    async fn launch_fine_tune(
        &self,
        model_type: ModelType,
        train: &[serde_json::Value],
        val: &[serde_json::Value],
        output_path: &str,
    ) -> Result<String> {
        match model_type {
            ModelType::Embedding => {
                let model = self
                    .embedding_model
                    .as_ref()
                    .ok_or_else(|| Error::dependency("no embedding model collaborator configured"))?;
                let ok = model
                    .fine_tune(train, val, output_path, 3, 32, 1e-4)
                    .await?;
                if !ok {
                    return Err(Error::dependency("embedding fine-tune reported failure"));
                }
                Ok(output_path.to_string())
            }
            _ => {
                let llm = self
                    .llm
                    .as_ref()
                    .ok_or_else(|| Error::dependency("no LLM collaborator configured"))?;
                let training_file = format!("{output_path}.train.jsonl");
                let validation_file = format!("{output_path}.val.jsonl");
                let result = llm
                    .fine_tune(
                        &training_file,
                        &validation_file,
                        model_type.as_str(),
                        "matrag",
                        matrag_core::FineTuneHyperparameters {
                            epochs: None,
                            batch_size: None,
                            learning_rate: None,
                        },
                    )
                    .await?;
                Ok(result.fine_tuned_model)
            }
        }
    }

    /// Aggregates per-variant quality metrics for a running A/B test,
    /// declares a winner by the configured primary metric (ties broken by
    /// newer `registered_date`), writes results, concludes the test, and
    /// promotes the winner to default. Keeps the current default if the
    /// test's sample size is insufficient.
    pub async fn conclude_ab_test(
        &self,
        model_type: ModelType,
        test_id: &str,
        primary_metric: &str,
        variant_metrics: HashMap<String, VariantResult>,
        min_sample_size: u64,
        observed_samples: u64,
    ) -> Result<Option<String>> {
        self.registry
            .update_ab_test_results(test_id, variant_metrics.clone(), None)
            .await?;

        if observed_samples < min_sample_size {
            info!(test_id, "insufficient sample size, keeping current default");
            self.registry
                .update_ab_test_results(test_id, HashMap::new(), Some(AbTestStatus::Concluded))
                .await?;
            self.state.reset_to_idle(model_type);
            return Ok(None);
        }

        let mut winner: Option<(&String, f64, DateTime<Utc>)> = None;
        for (variant, result) in &variant_metrics {
            let score = result.metrics.get(primary_metric).copied().unwrap_or(f64::MIN);
            let registered_date = match self.registry.get_model(variant).await? {
                Some(m) => m.registered_date,
                None => continue,
            };
            let better = match &winner {
                None => true,
                Some((_, best_score, best_date)) => {
                    score > *best_score || (score == *best_score && registered_date > *best_date)
                }
            };
            if better {
                winner = Some((variant, score, registered_date));
            }
        }

        self.registry
            .update_ab_test_results(test_id, HashMap::new(), Some(AbTestStatus::Concluded))
            .await?;

        match winner {
            Some((winner_id, ..)) => {
                self.registry.set_default_model(model_type, winner_id).await?;
                self.state.set(model_type, PipelineState::Promoted);
                self.state.reset_to_idle(model_type);
                Ok(Some(winner_id.clone()))
            }
            None => {
                error!(test_id, "could not determine a winner, keeping current default");
                self.state.reset_to_idle(model_type);
                Ok(None)
            }
        }
    }
}

fn tempfile_dataset_dir() -> Result<std::path::PathBuf> {
    let dir = tempfile::tempdir().map_err(Error::from)?;
    Ok(dir.into_path())
}

fn materialize_dataset(
    dir: &std::path::Path,
    train: &[matrag_core::FeedbackRecord],
    val: &[matrag_core::FeedbackRecord],
) -> Result<String> {
    use sha2::{Digest, Sha256};
    std::fs::create_dir_all(dir)?;
    let train_bytes = serde_json::to_vec(train)?;
    let val_bytes = serde_json::to_vec(val)?;
    std::fs::write(dir.join("train.json"), &train_bytes)?;
    std::fs::write(dir.join("val.json"), &val_bytes)?;
    let mut hasher = Sha256::new();
    hasher.update(&train_bytes);
    hasher.update(&val_bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
