use crate::engine::ContinuousLearningPipeline;
use matrag_core::ModelType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const MODEL_TYPES: [ModelType; 4] = [
    ModelType::Embedding,
    ModelType::Generative,
    ModelType::Vision,
    ModelType::Text,
];

/// Loops on a shutdown flag, sleeping in sub-intervals of at most 10
/// seconds so shutdown latency stays bounded regardless of
/// `check_interval_minutes`.
pub async fn run(
    pipeline: Arc<ContinuousLearningPipeline>,
    check_interval_minutes: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let sub_interval = Duration::from_secs(10);
    let total_interval = Duration::from_secs(check_interval_minutes.max(1) * 60);

    loop {
        let mut waited = Duration::ZERO;
        while waited < total_interval {
            if *shutdown.borrow() {
                info!("continuous learning service shutting down");
                return;
            }
            let step = sub_interval.min(total_interval - waited);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("continuous learning service shutting down");
                        return;
                    }
                }
            }
            waited += step;
        }

        for model_type in MODEL_TYPES {
            match pipeline.check_fine_tuning_triggers(model_type).await {
                Ok(true) => {
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        if let Err(e) = pipeline.run_fine_tuning(model_type).await {
                            error!(model_type = %model_type, error = %e, "fine-tune run failed");
                        }
                    });
                }
                Ok(false) => {}
                Err(e) => error!(model_type = %model_type, error = %e, "trigger evaluation failed"),
            }
        }
    }
}
