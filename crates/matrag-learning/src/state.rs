use dashmap::DashMap;
use matrag_core::ModelType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    BuildingDataset,
    FineTuning,
    Registered,
    ABTesting,
    Promoted,
}

/// Per-model-type state machine. Any failure resets to `Idle` so the next
/// trigger evaluation can re-arm; at most one fine-tune per model type is
/// ever in flight.
#[derive(Default)]
pub struct PipelineStateTable {
    states: DashMap<&'static str, PipelineState>,
}

impl PipelineStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model_type: ModelType) -> PipelineState {
        self.states
            .get(model_type.as_str())
            .map(|s| *s)
            .unwrap_or(PipelineState::Idle)
    }

    pub fn set(&self, model_type: ModelType, state: PipelineState) {
        self.states.insert(model_type.as_str(), state);
    }

    pub fn is_idle(&self, model_type: ModelType) -> bool {
        matches!(self.get(model_type), PipelineState::Idle)
    }

    pub fn reset_to_idle(&self, model_type: ModelType) {
        self.set(model_type, PipelineState::Idle);
    }
}
