pub mod engine;
pub mod service;
pub mod state;

pub use engine::ContinuousLearningPipeline;
pub use state::PipelineState;
