//! Synthetic square road network for demos and smoke runs
//!
//! Links are the cells of an `n x n` grid, `link = row * n + col`. Action
//! `k` moves one cell in compass direction `k`, clockwise from north:
//!
//! ```text
//! 7 0 1
//! 6 . 2
//! 5 4 3
//! ```
//!
//! which matches the neighborhood grid layout. Moves off the grid lead to
//! the padding link `n * n`.

use rand::Rng;

use crate::infra::{ExpertTrajectory, LinkId, Result, RoadGraph, Trajectory, Transition};
use crate::model::{FeatureTables, SpeedObservations};

/// `(d_row, d_col)` of each compass action.
pub const COMPASS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
];

/// Path features per (link, destination): row offset, column offset, distance.
pub const PATH_DIM: usize = 3;

/// Edge features per link: length, lane count.
pub const EDGE_DIM: usize = 2;

#[derive(Debug, Clone)]
pub struct SyntheticNetwork {
    size: usize,
    time_steps: u32,
    tables: FeatureTables,
    speed: SpeedObservations,
    graph: RoadGraph,
}

impl SyntheticNetwork {
    /// A `size x size` grid with random edge features and speeds observed
    /// at `time_steps` time steps.
    pub fn generate<R: Rng>(size: usize, time_steps: u32, rng: &mut R) -> Result<Self> {
        let n_links = size * size;
        let pad_idx = n_links;

        let mut action_state = Vec::with_capacity(n_links + 1);
        for link in 0..n_links {
            let (row, col) = ((link / size) as i64, (link % size) as i64);
            let successors = COMPASS
                .iter()
                .map(|&(d_row, d_col)| {
                    let (r, c) = (row + d_row, col + d_col);
                    if r < 0 || c < 0 || r >= size as i64 || c >= size as i64 {
                        pad_idx
                    } else {
                        r as usize * size + c as usize
                    }
                })
                .collect();
            action_state.push(successors);
        }
        let graph = RoadGraph::new(action_state.clone(), pad_idx)?;
        action_state.push(vec![pad_idx; COMPASS.len()]);

        let policy_mask = action_state
            .iter()
            .map(|row| row.iter().map(|&next| next != pad_idx).collect())
            .collect();

        let scale = size.max(1) as f32;
        let mut path_feature = Vec::with_capacity(n_links + 1);
        for link in 0..n_links {
            let per_destination = (0..n_links)
                .map(|destination| {
                    let d_row = (destination / size) as f32 - (link / size) as f32;
                    let d_col = (destination % size) as f32 - (link % size) as f32;
                    vec![d_row / scale, d_col / scale, d_row.hypot(d_col) / scale]
                })
                .collect();
            path_feature.push(per_destination);
        }
        path_feature.push(vec![vec![0.0; PATH_DIM]; n_links]);

        let mut edge_feature: Vec<Vec<f32>> = (0..n_links)
            .map(|_| vec![rng.random_range(0.5..1.5), rng.random_range(1..=3) as f32])
            .collect();
        edge_feature.push(vec![0.0; EDGE_DIM]);

        let mut speed = SpeedObservations::new();
        for link in 0..n_links {
            for time_step in 0..time_steps {
                // leave some gaps so missing observations are exercised
                if rng.random_bool(0.9) {
                    speed.insert(link, time_step, rng.random_range(20.0..60.0));
                }
            }
        }

        tracing::info!(
            "Synthetic network: {}x{} grid, {} links, {} speed observations",
            size,
            size,
            n_links,
            speed.len()
        );

        Ok(Self {
            size,
            time_steps,
            tables: FeatureTables {
                policy_mask,
                action_state,
                path_feature,
                edge_feature,
                pad_idx: Some(pad_idx),
            },
            speed,
            graph,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_links(&self) -> usize {
        self.size * self.size
    }

    pub fn tables(&self) -> &FeatureTables {
        &self.tables
    }

    pub fn speed(&self) -> &SpeedObservations {
        &self.speed
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    /// Compass action moving from `link` one step toward `destination`.
    fn step_toward(&self, link: LinkId, destination: LinkId) -> Option<usize> {
        let d_row = ((destination / self.size) as i64 - (link / self.size) as i64).signum();
        let d_col = ((destination % self.size) as i64 - (link % self.size) as i64).signum();
        COMPASS.iter().position(|&offset| offset == (d_row, d_col))
    }

    /// The straight-then-diagonal route an expert driver takes.
    pub fn expert_path(&self, origin: LinkId, destination: LinkId) -> Trajectory {
        let mut links = vec![origin];
        let mut current = origin;
        while let Some(action) = self.step_toward(current, destination) {
            current = self.tables.action_state[current][action];
            links.push(current);
        }
        Trajectory::new(links)
    }

    /// `count` expert trajectories between random distinct links.
    pub fn sample_experts<R: Rng>(&self, count: usize, rng: &mut R) -> Vec<ExpertTrajectory> {
        let n_links = self.n_links();
        let mut experts = Vec::with_capacity(count);
        while experts.len() < count && n_links > 1 {
            let origin = rng.random_range(0..n_links);
            let destination = rng.random_range(0..n_links);
            if origin == destination {
                continue;
            }
            let time_step = rng.random_range(0..self.time_steps.max(1));
            experts.push(ExpertTrajectory {
                trajectory: self.expert_path(origin, destination),
                time_step,
            });
        }
        experts
    }

    /// `(s, a, s')` steps of an expert trajectory.
    pub fn transitions(&self, expert: &ExpertTrajectory) -> Vec<Transition> {
        expert
            .trajectory
            .links()
            .windows(2)
            .filter_map(|pair| {
                let action = self.tables.action_state[pair[0]]
                    .iter()
                    .position(|&next| next == pair[1])?;
                Some(Transition {
                    state: pair[0],
                    action,
                    next_state: pair[1],
                    time_step: expert.time_step,
                })
            })
            .collect()
    }
}
