use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ModelId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Embedding,
    Generative,
    Vision,
    Text,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Embedding => "embedding",
            ModelType::Generative => "generative",
            ModelType::Vision => "vision",
            ModelType::Text => "text",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered model version. `metadata` is free-form provenance (parent
/// model id, training sample count, dataset hash); `performance` tracks
/// metric -> value plus when it was last touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_id: ModelId,
    pub model_type: ModelType,
    pub model_path: String,
    pub registered_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub performance: Performance,
    /// Soft-retention flag; entries are never hard deleted.
    #[serde(default)]
    pub retired: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Planned,
    Running,
    Concluded,
    Aborted,
}

impl AbTestStatus {
    /// `status` transitions only forward: planned -> running -> concluded|aborted.
    pub fn can_transition_to(self, next: AbTestStatus) -> bool {
        use AbTestStatus::*;
        matches!(
            (self, next),
            (Planned, Running)
                | (Planned, Aborted)
                | (Running, Concluded)
                | (Running, Aborted)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub variants: Vec<ModelId>,
    pub traffic_split: Vec<f64>,
    pub status: AbTestStatus,
    #[serde(default)]
    pub results: HashMap<ModelId, VariantResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantResult {
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AbTest {
    pub fn validate(&self) -> Result<(), String> {
        if self.end_date <= self.start_date {
            return Err("end_date must be after start_date".into());
        }
        if self.variants.len() < 2 {
            return Err("an A/B test needs at least two variants".into());
        }
        if self.variants.len() != self.traffic_split.len() {
            return Err("traffic_split must have one weight per variant".into());
        }
        let sum: f64 = self.traffic_split.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("traffic_split must sum to 1.0, got {sum}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultPointers {
    #[serde(default)]
    pub pointers: HashMap<String, ModelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAspectScore {
    pub aspect: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    pub max_rating: u8,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub aspects: Vec<FeedbackAspectScore>,
}

impl Feedback {
    pub fn normalized(&self) -> f64 {
        if self.max_rating == 0 {
            return 0.0;
        }
        self.rating as f64 / self.max_rating as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub query: String,
    pub response: serde_json::Value,
    pub feedback: Feedback,
    pub timestamp: DateTime<Utc>,
}

/// A weighted fragment of a decomposed complex query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuery {
    pub query: String,
    pub weight: f64,
    pub aspect: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub material_type: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Score from the originating store/sub-query before any recombination.
    pub score: f64,
    /// Final score after dedup/rerank; equal to `score` until recombined.
    #[serde(default)]
    pub combined_score: Option<f64>,
    #[serde(default)]
    pub store_id: Option<String>,
    /// Weighted sub-query contributions that produced this material,
    /// keyed by aspect label.
    #[serde(default)]
    pub sub_queries: Vec<String>,
}

impl Material {
    pub fn final_score(&self) -> f64 {
        self.combined_score.unwrap_or(self.score)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub materials: Vec<Material>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievalResult {
    /// Invariant check used in tests: ids unique, sorted descending by
    /// final score.
    pub fn is_well_formed(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut last_score = f64::INFINITY;
        for m in &self.materials {
            if !seen.insert(&m.id) {
                return false;
            }
            let score = m.final_score();
            if score > last_score {
                return false;
            }
            last_score = score;
        }
        true
    }
}

/// Running per-store statistics used by the load-balanced strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub queries: u64,
    pub latency_total_ms: u64,
}

impl StoreStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.latency_total_ms as f64 / self.queries as f64
        }
    }

    pub fn record(&mut self, latency_ms: u64) {
        self.queries += 1;
        self.latency_total_ms += latency_ms;
    }

    /// `avg_latency * (queries + 1)`; lower is better. Cold-start stores
    /// (zero queries) all score 0 and are tie-broken by caller index.
    pub fn load_score(&self) -> f64 {
        self.avg_latency_ms() * (self.queries as f64 + 1.0)
    }
}
