use serde::{Deserialize, Serialize};

/// Closed set of configuration knobs (spec §6.4), layered from a TOML file
/// with a `MATRAG_`-prefixed environment overlay the way the teacher's
/// daemon config loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub max_concurrent_requests: usize,
    pub timeout_seconds: u64,
    pub max_sub_queries: usize,
    pub min_query_length: usize,
    pub reranking_enabled: bool,

    pub min_feedback_samples: u64,
    pub feedback_threshold: f64,
    pub fine_tuning_interval_days: i64,
    pub test_size: f64,
    pub ab_test_duration_days: i64,
    pub models_to_compare: usize,
    pub check_interval_minutes: u64,

    pub registry_dir: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 300,
            max_concurrent_requests: 8,
            timeout_seconds: 5,
            max_sub_queries: 5,
            min_query_length: 20,
            reranking_enabled: true,

            min_feedback_samples: 50,
            feedback_threshold: 0.7,
            fine_tuning_interval_days: 7,
            test_size: 0.2,
            ab_test_duration_days: 3,
            models_to_compare: 2,
            check_interval_minutes: 60,

            registry_dir: "./data/registry".to_string(),
        }
    }
}

impl RagConfig {
    /// Loads defaults, then an optional TOML file, then `MATRAG_*`
    /// environment variables, in that order of increasing precedence.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("MATRAG"));
        builder.build()?.try_deserialize()
    }
}
