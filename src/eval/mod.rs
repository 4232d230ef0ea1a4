//! Trajectory decoding and evaluation against ground truth

pub mod decoder;
pub mod evaluator;
pub mod metrics;
pub mod report;

pub use decoder::{ActionProbability, MAX_HOPS, TrajectoryDecoder, TransitionMatrix};
pub use evaluator::{
    EvaluationReport, Evaluator, EvaluatorConfig, evaluate_log_prob, evaluate_train_edit_distance,
};
pub use metrics::{
    OdGroups, TrajectoryMetrics, evaluate_bleu, evaluate_dataset_distance, evaluate_edit_distance,
    jensen_shannon_distance, levenshtein, normalized_edit_distance, sentence_bleu,
};
