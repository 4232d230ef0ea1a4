pub mod eval;
pub mod infra;
pub mod model;
pub mod synthetic;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use eval::{ActionProbability, EvaluationReport, Evaluator, EvaluatorConfig};
pub use infra::{ActionGraph, AirlError, ExpertTrajectory, LinkId, OdQuery, Result, RoadGraph, Trajectory};
pub use model::{
    AirlConfig, CnnConfig, DiscriminatorAirlCnn, DiscriminatorCnn, FeatureStore, FeatureTables, PolicyCnn,
    SpeedObservations, StateBatch, TransitionBatch,
};
