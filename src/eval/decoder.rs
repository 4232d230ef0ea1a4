//! Greedy trajectory decoding over the policy's link-to-link transition matrix

use crate::infra::{ActionGraph, AirlError, LinkId, OdQuery, Result, Trajectory, check_index};
use crate::model::StateBatch;

/// Hop budget of a decoded trajectory.
pub const MAX_HOPS: usize = 50;

/// Anything that can score the actions available at a set of links.
pub trait ActionProbability {
    fn action_num(&self) -> usize;

    /// Row-major `[states.len(), action_num]` action probabilities, every
    /// state evaluated toward `destination` at `time_step`.
    fn action_probs(&self, states: &[LinkId], destination: LinkId, time_step: u32) -> Result<Vec<f32>>;

    /// `log pi(action | state)` per batch row.
    fn log_probs(&self, batch: &StateBatch, actions: &[usize]) -> Result<Vec<f32>> {
        if actions.len() != batch.len() {
            return Err(AirlError::shape(format!(
                "{} actions for {} states",
                actions.len(),
                batch.len()
            )));
        }

        let action_num = self.action_num();
        let mut log_probs = Vec::with_capacity(batch.len());
        for ((state, destination, time_step), &action) in batch.rows().zip(actions) {
            check_index("action", action, action_num)?;
            let probs = self.action_probs(&[state], destination, time_step)?;
            log_probs.push(probs[action].ln());
        }
        Ok(log_probs)
    }
}

/// Dense `[n_links, n_links]` link-to-link probabilities for one
/// destination and time step.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    n_links: usize,
    values: Vec<f32>,
}

impl TransitionMatrix {
    /// `probs` is `[n_links, action_num]` row-major. Actions leading to the
    /// padding state contribute nothing; when two actions share a target
    /// the later one wins.
    pub fn build<G: ActionGraph + ?Sized>(graph: &G, probs: &[f32]) -> Result<Self> {
        let n_links = graph.n_links();
        let action_num = graph.action_num();
        if probs.len() != n_links * action_num {
            return Err(AirlError::shape(format!(
                "{} action probabilities for {} links x {} actions",
                probs.len(),
                n_links,
                action_num
            )));
        }

        let pad_idx = graph.pad_idx();
        let mut values = vec![0.0; n_links * n_links];
        for state in 0..n_links {
            for action in 0..action_num {
                let next = graph.next_state(state, action);
                if next == pad_idx {
                    continue;
                }
                check_index("successor link", next, n_links)?;
                values[state * n_links + next] = probs[state * action_num + action];
            }
        }

        Ok(Self { n_links, values })
    }

    pub fn n_links(&self) -> usize {
        self.n_links
    }

    pub fn row(&self, state: LinkId) -> &[f32] {
        &self.values[state * self.n_links..(state + 1) * self.n_links]
    }

    /// Highest-probability successor, first index on ties.
    pub fn most_likely_next(&self, state: LinkId) -> LinkId {
        let mut best = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (next, &value) in self.row(state).iter().enumerate() {
            if value > best_value {
                best = next;
                best_value = value;
            }
        }
        best
    }

    /// Follow the most likely successor from `origin` until `destination`
    /// or `max_hops` steps.
    pub fn greedy_path(&self, origin: LinkId, destination: LinkId, max_hops: usize) -> Result<Trajectory> {
        check_index("origin", origin, self.n_links)?;

        let mut links = Vec::with_capacity(max_hops + 1);
        links.push(origin);
        let mut current = origin;
        for _ in 0..max_hops {
            if current == destination {
                break;
            }
            current = self.most_likely_next(current);
            links.push(current);
        }

        if current != destination {
            tracing::debug!(
                "No route from {} to {} within {} hops, truncated at {}",
                origin,
                destination,
                max_hops,
                current
            );
        }
        Ok(Trajectory::new(links))
    }
}

/// Decodes learner trajectories for a sequence of OD queries.
pub struct TrajectoryDecoder<'a, P: ?Sized, G: ?Sized> {
    policy: &'a P,
    graph: &'a G,
    max_hops: usize,
}

impl<'a, P: ActionProbability + ?Sized, G: ActionGraph + ?Sized> TrajectoryDecoder<'a, P, G> {
    pub fn new(policy: &'a P, graph: &'a G) -> Self {
        Self {
            policy,
            graph,
            max_hops: MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Transition matrix of every link toward `destination` at `time_step`.
    pub fn transition_matrix(&self, destination: LinkId, time_step: u32) -> Result<TransitionMatrix> {
        if self.policy.action_num() != self.graph.action_num() {
            return Err(AirlError::shape(format!(
                "policy scores {} actions, graph has {}",
                self.policy.action_num(),
                self.graph.action_num()
            )));
        }

        let states: Vec<LinkId> = (0..self.graph.n_links()).collect();
        let probs = self.policy.action_probs(&states, destination, time_step)?;
        TransitionMatrix::build(self.graph, &probs)
    }

    /// One trajectory per query, in query order.
    ///
    /// A query identical to the previous one reuses its trajectory; a query
    /// sharing only destination and time step reuses its matrix.
    pub fn decode(&self, queries: &[OdQuery]) -> Result<Vec<Trajectory>> {
        let mut trajectories: Vec<Trajectory> = Vec::with_capacity(queries.len());
        let mut previous: Option<OdQuery> = None;
        let mut matrix: Option<((LinkId, u32), TransitionMatrix)> = None;
        let mut matrices_built = 0;

        for query in queries {
            if previous.as_ref() == Some(query) {
                if let Some(last) = trajectories.last().cloned() {
                    trajectories.push(last);
                    continue;
                }
            }

            let key = (query.destination, query.time_step);
            let current = match matrix.take() {
                Some((cached_key, cached)) if cached_key == key => cached,
                _ => {
                    matrices_built += 1;
                    self.transition_matrix(query.destination, query.time_step)?
                }
            };

            trajectories.push(current.greedy_path(query.origin, query.destination, self.max_hops)?);
            matrix = Some((key, current));
            previous = Some(*query);
        }

        tracing::debug!(
            "Decoded {} queries with {} transition matrices",
            queries.len(),
            matrices_built
        );
        Ok(trajectories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::RoadGraph;
    use crate::testing::{ForwardPolicy, chain_graph};
    use std::cell::Cell;

    /// Counts how often the decoder asks for probabilities.
    struct CountingPolicy {
        calls: Cell<usize>,
    }

    impl ActionProbability for CountingPolicy {
        fn action_num(&self) -> usize {
            ForwardPolicy.action_num()
        }

        fn action_probs(&self, states: &[LinkId], destination: LinkId, time_step: u32) -> Result<Vec<f32>> {
            self.calls.set(self.calls.get() + 1);
            ForwardPolicy.action_probs(states, destination, time_step)
        }
    }

    #[test]
    fn test_transition_matrix_skips_padding() {
        let graph = chain_graph();
        let probs = ForwardPolicy.action_probs(&[0, 1, 2, 3], 3, 0).unwrap();
        let matrix = TransitionMatrix::build(&graph, &probs).unwrap();

        assert_eq!(matrix.row(0), &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(matrix.row(2), &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(matrix.row(3), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_later_action_overwrites_shared_target() {
        let graph = RoadGraph::new(vec![vec![1, 1], vec![2, 2]], 2).unwrap();
        let matrix = TransitionMatrix::build(&graph, &[0.7, 0.3, 0.5, 0.5]).unwrap();
        assert_eq!(matrix.row(0), &[0.0, 0.3]);
    }

    #[test]
    fn test_most_likely_next_prefers_first_on_ties() {
        let graph = RoadGraph::new(vec![vec![1, 2, 3], vec![3, 3, 3], vec![3, 3, 3]], 3).unwrap();
        let matrix = TransitionMatrix::build(&graph, &[0.4, 0.4, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(matrix.most_likely_next(0), 1);
        // dead end: argmax of an all-zero row
        assert_eq!(matrix.most_likely_next(1), 0);
    }

    #[test]
    fn test_decode_chain() {
        let graph = chain_graph();
        let decoder = TrajectoryDecoder::new(&ForwardPolicy, &graph);

        let paths = decoder.decode(&[OdQuery::new(0, 3, 0), OdQuery::new(1, 3, 0)]).unwrap();
        assert_eq!(paths[0].links(), &[0, 1, 2, 3]);
        assert_eq!(paths[1].links(), &[1, 2, 3]);
    }

    #[test]
    fn test_origin_at_destination() {
        let graph = chain_graph();
        let decoder = TrajectoryDecoder::new(&ForwardPolicy, &graph);

        let paths = decoder.decode(&[OdQuery::new(2, 2, 0)]).unwrap();
        assert_eq!(paths[0].links(), &[2]);
    }

    #[test]
    fn test_unreachable_destination_is_truncated() {
        // link 1 only loops back onto itself
        let graph = RoadGraph::new(vec![vec![1, 2], vec![1, 2]], 2).unwrap();
        let matrix = TransitionMatrix::build(&graph, &[1.0, 0.0, 1.0, 0.0]).unwrap();

        let path = matrix.greedy_path(1, 0, MAX_HOPS).unwrap();
        assert_eq!(path.len(), MAX_HOPS + 1);
        assert!(path.links().iter().all(|&link| link == 1));

        assert_eq!(matrix.greedy_path(1, 0, 2).unwrap().links(), &[1, 1, 1]);
    }

    #[test]
    fn test_repeated_queries_reuse_work() {
        let graph = chain_graph();
        let policy = CountingPolicy { calls: Cell::new(0) };
        let decoder = TrajectoryDecoder::new(&policy, &graph);

        let queries = [
            OdQuery::new(0, 3, 0),
            OdQuery::new(0, 3, 0),
            OdQuery::new(1, 3, 0),
            OdQuery::new(1, 3, 1),
        ];
        let paths = decoder.decode(&queries).unwrap();

        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0], paths[1]);
        assert_eq!(paths[2].links(), &[1, 2, 3]);
        assert_eq!(policy.calls.get(), 2);
    }

    #[test]
    fn test_rejects_origin_outside_graph() {
        let graph = chain_graph();
        let decoder = TrajectoryDecoder::new(&ForwardPolicy, &graph);
        assert!(decoder.decode(&[OdQuery::new(7, 3, 0)]).is_err());
    }

    #[test]
    fn test_default_log_probs() {
        let batch = StateBatch::broadcast(vec![0, 1], 3, 0).unwrap();
        let log_probs = ForwardPolicy.log_probs(&batch, &[0, 0]).unwrap();
        assert_eq!(log_probs, vec![0.0, 0.0]);
        assert!(ForwardPolicy.log_probs(&batch, &[0]).is_err());
    }
}
