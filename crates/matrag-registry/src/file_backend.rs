use crate::{stamp_performance, validate_duplicate, ModelRegistry};
use async_trait::async_trait;
use chrono::Utc;
use matrag_core::{
    AbTest, AbTestStatus, DefaultPointers, Error, ModelEntry, ModelId, ModelType, Performance,
    Result, VariantResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// File-backed registry rooted at `registry_dir`, with three artifacts:
/// `models`, `ab_tests`, `defaults`. Each artifact is written via
/// write-to-temp + rename so readers never observe a partial write.
/// A per-artifact async mutex serializes writers.
pub struct FileModelRegistry {
    dir: PathBuf,
    models_lock: Mutex<()>,
    ab_tests_lock: Mutex<()>,
    defaults_lock: Mutex<()>,
}

impl FileModelRegistry {
    pub fn new(registry_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: registry_dir.as_ref().to_path_buf(),
            models_lock: Mutex::new(()),
            ab_tests_lock: Mutex::new(()),
            defaults_lock: Mutex::new(()),
        }
    }

    fn path(&self, artifact: &str) -> PathBuf {
        self.dir.join(artifact)
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(&self, artifact: &str) -> Result<T> {
        let path = self.path(artifact);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(Error::from),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Atomic write-temp + rename into `registry_dir`.
    async fn write_json<T: serde::Serialize>(&self, artifact: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.path(artifact);
        let tmp_path = self.dir.join(format!("{artifact}.tmp.{}", uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| {
                Error::storage(format!("atomic rename of {artifact} failed: {e}"))
            })?;
        Ok(())
    }

    async fn load_models(&self) -> Result<Vec<ModelEntry>> {
        self.read_json("models").await
    }

    async fn load_ab_tests(&self) -> Result<Vec<AbTest>> {
        self.read_json("ab_tests").await
    }

    async fn load_defaults(&self) -> Result<DefaultPointers> {
        self.read_json("defaults").await
    }
}

#[async_trait]
impl ModelRegistry for FileModelRegistry {
    async fn register_model(
        &self,
        model_id: ModelId,
        model_type: ModelType,
        model_path: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let _guard = self.models_lock.lock().await;
        let mut models = self.load_models().await?;
        validate_duplicate(models.iter().find(|m| m.model_id == model_id))?;
        models.push(ModelEntry {
            model_id,
            model_type,
            model_path,
            registered_date: Utc::now(),
            metadata,
            performance: Performance::default(),
            retired: false,
        });
        self.write_json("models", &models).await
    }

    async fn get_model(&self, model_id: &str) -> Result<Option<ModelEntry>> {
        let models = self.load_models().await?;
        Ok(models.into_iter().find(|m| m.model_id == model_id))
    }

    async fn get_latest_models(&self, model_type: ModelType, limit: usize) -> Result<Vec<ModelEntry>> {
        let mut models: Vec<ModelEntry> = self
            .load_models()
            .await?
            .into_iter()
            .filter(|m| m.model_type == model_type)
            .collect();
        models.sort_by(|a, b| b.registered_date.cmp(&a.registered_date));
        models.truncate(limit);
        Ok(models)
    }

    async fn update_model_performance(
        &self,
        model_id: &str,
        metrics: HashMap<String, f64>,
    ) -> Result<()> {
        let _guard = self.models_lock.lock().await;
        let mut models = self.load_models().await?;
        let entry = models
            .iter_mut()
            .find(|m| m.model_id == model_id)
            .ok_or_else(|| Error::state(format!("model not found: {model_id}")))?;
        stamp_performance(entry, metrics, Utc::now());
        self.write_json("models", &models).await
    }

    async fn register_ab_test(&self, config: AbTest) -> Result<()> {
        config.validate().map_err(Error::input)?;
        let models = self.load_models().await?;
        for variant in &config.variants {
            if !models.iter().any(|m| &m.model_id == variant) {
                return Err(Error::input(format!(
                    "ab test references unknown model: {variant}"
                )));
            }
        }
        let _guard = self.ab_tests_lock.lock().await;
        let mut tests = self.load_ab_tests().await?;
        tests.push(config);
        self.write_json("ab_tests", &tests).await
    }

    async fn update_ab_test_results(
        &self,
        id: &str,
        results: HashMap<ModelId, VariantResult>,
        status: Option<AbTestStatus>,
    ) -> Result<()> {
        let _guard = self.ab_tests_lock.lock().await;
        let mut tests = self.load_ab_tests().await?;
        let test = tests
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::state(format!("ab test not found: {id}")))?;
        for (variant, result) in results {
            test.results.insert(variant, result);
        }
        if let Some(next) = status {
            if !test.status.can_transition_to(next) {
                return Err(Error::state(format!(
                    "illegal status transition {:?} -> {:?}",
                    test.status, next
                )));
            }
            test.status = next;
        }
        self.write_json("ab_tests", &tests).await
    }

    async fn get_ab_test(&self, id: &str) -> Result<Option<AbTest>> {
        let tests = self.load_ab_tests().await?;
        Ok(tests.into_iter().find(|t| t.id == id))
    }

    async fn set_default_model(&self, model_type: ModelType, model_id: &str) -> Result<()> {
        let model = self
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::state(format!("model not found: {model_id}")))?;
        if model.model_type != model_type {
            return Err(Error::input(format!(
                "model {model_id} is of type {:?}, not {:?}",
                model.model_type, model_type
            )));
        }
        let _guard = self.defaults_lock.lock().await;
        let mut defaults = self.load_defaults().await?;
        defaults
            .pointers
            .insert(model_type.as_str().to_string(), model_id.to_string());
        self.write_json("defaults", &defaults).await
    }

    async fn get_default_model(&self, model_type: ModelType) -> Result<Option<ModelEntry>> {
        let defaults = self.load_defaults().await?;
        match defaults.pointers.get(model_type.as_str()) {
            Some(model_id) => self.get_model(model_id).await,
            None => Ok(None),
        }
    }
}
