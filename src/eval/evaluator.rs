//! Evaluation entry point: decode learner trajectories, score them, write reports

use std::path::PathBuf;

use crate::infra::{ActionGraph, AirlError, ExpertTrajectory, OdQuery, Result, Trajectory, Transition};
use crate::model::StateBatch;

use super::decoder::{ActionProbability, MAX_HOPS, TrajectoryDecoder};
use super::metrics::{TrajectoryMetrics, evaluate_edit_distance};
use super::report;

/// Configuration for an evaluation run
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Hop budget of each decoded trajectory
    pub max_hops: usize,
    /// Directory receiving the CSV reports
    pub output_dir: PathBuf,
    /// Ground truth and learner side by side
    pub trajectories_file: String,
    /// Same, with the query time step
    pub timestep_file: String,
    /// Skip the CSV reports when false
    pub write_reports: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            output_dir: PathBuf::from("."),
            trajectories_file: "trajectories.csv".to_string(),
            timestep_file: "trajectory_with_timestep.csv".to_string(),
            write_reports: true,
        }
    }
}

/// Metrics of one evaluation run plus the decoded trajectories.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub edit_distance: f64,
    pub bleu: f64,
    pub js_distance: f64,
    /// One trajectory per query, in query order
    pub learner: Vec<Trajectory>,
}

impl EvaluationReport {
    pub fn metrics(&self) -> TrajectoryMetrics {
        TrajectoryMetrics {
            edit_distance: self.edit_distance,
            bleu: self.bleu,
            js_distance: self.js_distance,
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Evaluation Summary ===");
        tracing::info!("Trajectories: {}", self.learner.len());
        tracing::info!("Edit distance: {:.4}", self.edit_distance);
        tracing::info!("BLEU score: {:.4}", self.bleu);
        tracing::info!("JS distance: {:.4}", self.js_distance);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// The query each expert trajectory answers.
    pub fn queries_from(expert: &[ExpertTrajectory]) -> Result<Vec<OdQuery>> {
        expert
            .iter()
            .enumerate()
            .map(|(i, trajectory)| {
                trajectory
                    .query()
                    .ok_or_else(|| AirlError::EmptyInput(format!("expert trajectory {} has no links", i)))
            })
            .collect()
    }

    /// Decode one trajectory per query and compare against `expert`,
    /// row by row.
    pub fn evaluate_model<P, G>(
        &self,
        policy: &P,
        graph: &G,
        queries: &[OdQuery],
        expert: &[Trajectory],
    ) -> Result<EvaluationReport>
    where
        P: ActionProbability + ?Sized,
        G: ActionGraph + ?Sized,
    {
        if queries.len() != expert.len() {
            return Err(AirlError::shape(format!(
                "{} queries but {} ground-truth trajectories",
                queries.len(),
                expert.len()
            )));
        }

        let learner = TrajectoryDecoder::new(policy, graph)
            .with_max_hops(self.config.max_hops)
            .decode(queries)?;
        let metrics = TrajectoryMetrics::compute(expert, &learner)?;

        let report = EvaluationReport {
            edit_distance: metrics.edit_distance,
            bleu: metrics.bleu,
            js_distance: metrics.js_distance,
            learner,
        };
        report.log_summary();

        if self.config.write_reports {
            let time_steps: Vec<u32> = queries.iter().map(|query| query.time_step).collect();
            self.write_reports(expert, &report.learner, &time_steps)?;
        }

        Ok(report)
    }

    /// [`Self::evaluate_model`] with the queries taken from the expert
    /// trajectories themselves.
    pub fn evaluate_expert<P, G>(&self, policy: &P, graph: &G, expert: &[ExpertTrajectory]) -> Result<EvaluationReport>
    where
        P: ActionProbability + ?Sized,
        G: ActionGraph + ?Sized,
    {
        let queries = Self::queries_from(expert)?;
        let test: Vec<Trajectory> = expert.iter().map(|e| e.trajectory.clone()).collect();
        self.evaluate_model(policy, graph, &queries, &test)
    }

    fn write_reports(&self, test: &[Trajectory], learner: &[Trajectory], time_steps: &[u32]) -> Result<()> {
        let dir = &self.config.output_dir;
        report::save_csv(&dir.join(&self.config.trajectories_file), |w| {
            report::write_trajectories(w, test, learner)
        })?;
        report::save_csv(&dir.join(&self.config.timestep_file), |w| {
            report::write_trajectories_with_timestep(w, test, learner, time_steps)
        })?;

        tracing::info!("Trajectory reports written to {}", dir.display());
        Ok(())
    }
}

/// Edit distance of decoded training trajectories against the training
/// set, for picking the best epoch.
pub fn evaluate_train_edit_distance(train: &[Trajectory], learner: &[Trajectory]) -> Result<f64> {
    evaluate_edit_distance(train, learner)
}

/// Mean over episodes of `sum log pi(action | state)`.
///
/// Each episode is scored toward the last transition's next state at the
/// first transition's time step.
pub fn evaluate_log_prob<P: ActionProbability + ?Sized>(policy: &P, episodes: &[Vec<Transition>]) -> Result<f64> {
    let mut total = 0.0;
    let mut scored = 0;

    for (i, episode) in episodes.iter().enumerate() {
        let (Some(first), Some(last)) = (episode.first(), episode.last()) else {
            tracing::warn!("Skipping empty expert episode {}", i);
            continue;
        };

        let states: Vec<_> = episode.iter().map(|t| t.state).collect();
        let actions: Vec<usize> = episode.iter().map(|t| t.action).collect();
        let batch = StateBatch::broadcast(states, last.next_state, first.time_step)?;

        let log_probs = policy.log_probs(&batch, &actions)?;
        total += log_probs.iter().map(|&p| f64::from(p)).sum::<f64>();
        scored += 1;
    }

    if scored == 0 {
        return Err(AirlError::EmptyInput("no expert episodes to score".to_string()));
    }

    let mean = total / scored as f64;
    tracing::info!("Expert log-likelihood: {:.4} over {} episodes", mean, scored);
    Ok(mean)
}
