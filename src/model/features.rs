//! Feature store - immutable lookup tables shared by every forward pass
//!
//! Shape contracts (B = batch, P = path feature dim, E = edge feature dim):
//!
//! | operation            | input        | output              |
//! |----------------------|--------------|---------------------|
//! | `neighbor_features`  | `StateBatch` | `[B, 9, 1 + P + E + 1]` |
//! | `neighborhood`       | `StateBatch` | `[B, 1 + P + E + 1, 3, 3]` |
//! | `state_features`     | `StateBatch` | `[B, 1 + P + E]`    |
//! | `policy_mask_rows`   | `[B]` states | `[B, A]` (Int)      |

use std::collections::HashMap;
use std::sync::Arc;

use burn::prelude::*;

use crate::infra::{AirlError, LinkId, Result, check_index};

use super::batch::StateBatch;
use super::neighborhood::{self, GRID_SLOTS, NeighborParts};

/// Sparse speed observations keyed by `(link, time step)`.
#[derive(Debug, Clone, Default)]
pub struct SpeedObservations {
    values: HashMap<(LinkId, u32), f32>,
}

impl SpeedObservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link: LinkId, time_step: u32, speed: f32) {
        self.values.insert((link, time_step), speed);
    }

    /// Observed speed, or `0.0` when nothing was observed for the key.
    pub fn get(&self, link: LinkId, time_step: u32) -> f32 {
        self.values.get(&(link, time_step)).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<((LinkId, u32), f32)> for SpeedObservations {
    fn from_iter<I: IntoIterator<Item = ((LinkId, u32), f32)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Raw network tables as handed over by the data-loading side.
#[derive(Debug, Clone)]
pub struct FeatureTables {
    /// `[n_states][action_num]`, true where the action exists
    pub policy_mask: Vec<Vec<bool>>,
    /// `[n_states][action_num]`, successor state or the padding index
    pub action_state: Vec<Vec<LinkId>>,
    /// `[n_states][n_destinations][path_dim]`
    pub path_feature: Vec<Vec<Vec<f32>>>,
    /// `[n_states][edge_dim]`
    pub edge_feature: Vec<Vec<f32>>,
    /// Padding state used for missing neighbors
    pub pad_idx: Option<LinkId>,
}

/// Table sizes, used to size the networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDims {
    pub n_states: usize,
    pub n_destinations: usize,
    pub action_num: usize,
    pub path_dim: usize,
    pub edge_dim: usize,
}

impl FeatureDims {
    /// Channels of the neighborhood grid: speed, path, edge, mask.
    pub fn neighbor_feature_dim(&self) -> usize {
        1 + self.path_dim + self.edge_dim + 1
    }

    /// Channels of the static grid: path, edge, mask.
    pub fn static_feature_dim(&self) -> usize {
        self.path_dim + self.edge_dim + 1
    }

    /// Width of a single-state feature row: speed, path, edge.
    pub fn state_feature_dim(&self) -> usize {
        1 + self.path_dim + self.edge_dim
    }

    /// Real actions plus the padding self-loop.
    pub fn neighbor_slots(&self) -> usize {
        self.action_num + 1
    }
}

/// Single-state features, kept apart so callers can inspect or perturb each
/// block before concatenation.
#[derive(Debug, Clone)]
pub struct StateParts<B: Backend> {
    /// `[B, 1]`
    pub speed: Tensor<B, 2>,
    /// `[B, P]`
    pub path: Tensor<B, 2>,
    /// `[B, E]`
    pub edge: Tensor<B, 2>,
}

impl<B: Backend> StateParts<B> {
    /// `[B, 1 + P + E]`
    pub fn concat(&self) -> Tensor<B, 2> {
        Tensor::cat(vec![self.speed.clone(), self.path.clone(), self.edge.clone()], 1)
    }
}

/// Immutable lookup tables living on one compute device.
///
/// Integer tables are mirrored on the host for index arithmetic and for the
/// sparse speed probe; dense feature tables live on the device.
#[derive(Debug, Clone)]
pub struct FeatureStore<B: Backend> {
    dims: FeatureDims,
    pad_idx: Option<LinkId>,
    /// `[n_states * (action_num + 1)]`, last slot of each row is the state itself
    neighbors_pad: Arc<Vec<LinkId>>,
    /// `[n_states * (action_num + 1)]`, last slot of each row is 0
    mask_pad: Arc<Vec<u8>>,
    speed: Arc<SpeedObservations>,
    /// `[n_states, action_num]`
    policy_mask: Tensor<B, 2, Int>,
    /// `[n_states, action_num + 1]`
    policy_mask_pad: Tensor<B, 2, Int>,
    /// `[n_states * n_destinations, path_dim]`
    path_feature: Tensor<B, 2>,
    /// `[n_states, edge_dim]`
    edge_feature: Tensor<B, 2>,
    device: B::Device,
}

impl<B: Backend> FeatureStore<B> {
    pub fn new(tables: FeatureTables, speed: SpeedObservations, device: &B::Device) -> Result<Self> {
        let dims = Self::validate(&tables)?;
        let slots = dims.neighbor_slots();

        let mut neighbors_pad = Vec::with_capacity(dims.n_states * slots);
        let mut mask_pad = Vec::with_capacity(dims.n_states * slots);
        for (state, (neighbors, mask)) in tables
            .action_state
            .iter()
            .zip(tables.policy_mask.iter())
            .enumerate()
        {
            neighbors_pad.extend_from_slice(neighbors);
            neighbors_pad.push(state);
            mask_pad.extend(mask.iter().map(|&valid| valid as u8));
            mask_pad.push(0);
        }

        let mask: Vec<i64> = tables
            .policy_mask
            .iter()
            .flat_map(|row| row.iter().map(|&valid| valid as i64))
            .collect();
        let mask_padded: Vec<i64> = mask_pad.iter().map(|&bit| bit as i64).collect();
        let path: Vec<f32> = tables
            .path_feature
            .iter()
            .flat_map(|per_destination| per_destination.iter().flatten().copied())
            .collect();
        let edge: Vec<f32> = tables.edge_feature.iter().flatten().copied().collect();

        let policy_mask = Tensor::<B, 1, Int>::from_ints(mask.as_slice(), device)
            .reshape([dims.n_states, dims.action_num]);
        let policy_mask_pad = Tensor::<B, 1, Int>::from_ints(mask_padded.as_slice(), device)
            .reshape([dims.n_states, slots]);
        let path_feature = Tensor::<B, 1>::from_floats(path.as_slice(), device)
            .reshape([dims.n_states * dims.n_destinations, dims.path_dim]);
        let edge_feature = Tensor::<B, 1>::from_floats(edge.as_slice(), device)
            .reshape([dims.n_states, dims.edge_dim]);

        tracing::debug!(
            "Feature store: {} states, {} destinations, {} actions, path_dim={}, edge_dim={}, {} speed observations",
            dims.n_states,
            dims.n_destinations,
            dims.action_num,
            dims.path_dim,
            dims.edge_dim,
            speed.len()
        );

        Ok(Self {
            dims,
            pad_idx: tables.pad_idx,
            neighbors_pad: Arc::new(neighbors_pad),
            mask_pad: Arc::new(mask_pad),
            speed: Arc::new(speed),
            policy_mask,
            policy_mask_pad,
            path_feature,
            edge_feature,
            device: device.clone(),
        })
    }

    fn validate(tables: &FeatureTables) -> Result<FeatureDims> {
        let n_states = tables.action_state.len();
        if n_states == 0 {
            return Err(AirlError::EmptyInput("feature tables have no states".to_string()));
        }

        let action_num = tables.action_state[0].len();
        if action_num + 1 != GRID_SLOTS {
            return Err(AirlError::shape(format!(
                "{} actions plus the padding slot do not fill the {}-cell neighborhood grid",
                action_num, GRID_SLOTS
            )));
        }

        for (name, rows) in [
            ("policy mask", tables.policy_mask.len()),
            ("path feature", tables.path_feature.len()),
            ("edge feature", tables.edge_feature.len()),
        ] {
            if rows != n_states {
                return Err(AirlError::shape(format!(
                    "{} table has {} rows, expected {}",
                    name, rows, n_states
                )));
            }
        }

        let n_destinations = tables.path_feature[0].len();
        let path_dim = tables.path_feature[0].first().map(|row| row.len()).unwrap_or(0);
        let edge_dim = tables.edge_feature[0].len();
        if n_destinations == 0 || path_dim == 0 || edge_dim == 0 {
            return Err(AirlError::EmptyInput(
                "path and edge feature tables need at least one column".to_string(),
            ));
        }

        for state in 0..n_states {
            if tables.action_state[state].len() != action_num
                || tables.policy_mask[state].len() != action_num
            {
                return Err(AirlError::shape(format!(
                    "state {} has {} adjacency and {} mask columns, expected {}",
                    state,
                    tables.action_state[state].len(),
                    tables.policy_mask[state].len(),
                    action_num
                )));
            }
            for &neighbor in &tables.action_state[state] {
                check_index("neighbor", neighbor, n_states)?;
            }
            if tables.edge_feature[state].len() != edge_dim {
                return Err(AirlError::shape(format!(
                    "edge feature row {} has {} columns, expected {}",
                    state,
                    tables.edge_feature[state].len(),
                    edge_dim
                )));
            }
            let per_destination = &tables.path_feature[state];
            if per_destination.len() != n_destinations
                || per_destination.iter().any(|row| row.len() != path_dim)
            {
                return Err(AirlError::shape(format!(
                    "path feature block of state {} is not {}x{}",
                    state, n_destinations, path_dim
                )));
            }
        }

        if let Some(pad_idx) = tables.pad_idx {
            check_index("padding state", pad_idx, n_states)?;
        }

        Ok(FeatureDims {
            n_states,
            n_destinations,
            action_num,
            path_dim,
            edge_dim,
        })
    }

    pub fn dims(&self) -> FeatureDims {
        self.dims
    }

    pub fn pad_idx(&self) -> Option<LinkId> {
        self.pad_idx
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Observed speed of `link` at `time_step`, `0.0` when unobserved.
    pub fn speed(&self, link: LinkId, time_step: u32) -> f32 {
        self.speed.get(link, time_step)
    }

    /// The `action_num + 1` neighbor ids of `state`, ending with `state`.
    pub fn padded_neighbors(&self, state: LinkId) -> &[LinkId] {
        let slots = self.dims.neighbor_slots();
        &self.neighbors_pad[state * slots..(state + 1) * slots]
    }

    /// The `action_num + 1` mask bits of `state`, ending with 0.
    pub fn padded_mask(&self, state: LinkId) -> &[u8] {
        let slots = self.dims.neighbor_slots();
        &self.mask_pad[state * slots..(state + 1) * slots]
    }

    /// A copy of this store on `device`. The host mirrors are shared.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            dims: self.dims,
            pad_idx: self.pad_idx,
            neighbors_pad: Arc::clone(&self.neighbors_pad),
            mask_pad: Arc::clone(&self.mask_pad),
            speed: Arc::clone(&self.speed),
            policy_mask: self.policy_mask.clone().to_device(device),
            policy_mask_pad: self.policy_mask_pad.clone().to_device(device),
            path_feature: self.path_feature.clone().to_device(device),
            edge_feature: self.edge_feature.clone().to_device(device),
            device: device.clone(),
        }
    }

    /// Rejects states or destinations outside the tables.
    pub fn check_batch(&self, batch: &StateBatch) -> Result<()> {
        for (state, destination, _) in batch.rows() {
            check_index("state", state, self.dims.n_states)?;
            check_index("destination", destination, self.dims.n_destinations)?;
        }
        Ok(())
    }

    /// `[B, 9, F]` neighbor features in adjacency-slot order.
    pub fn neighbor_features(&self, batch: &StateBatch) -> Result<Tensor<B, 3>> {
        Ok(self.neighbor_parts(batch)?.concat())
    }

    /// `[B, 9]` neighbor features split by block.
    pub fn neighbor_parts(&self, batch: &StateBatch) -> Result<NeighborParts<B>> {
        neighborhood::gather(self, batch)
    }

    /// `[B, F, 3, 3]` grid ready for the convolutional backbone.
    pub fn neighborhood(&self, batch: &StateBatch) -> Result<Tensor<B, 4>> {
        neighborhood::assemble(self, batch)
    }

    /// `[B, P + E + 1, 3, 3]` grid without the speed channel.
    pub fn static_neighborhood(&self, batch: &StateBatch) -> Result<Tensor<B, 4>> {
        Ok(self.neighbor_parts(batch)?.static_grid())
    }

    /// `[B, 1 + P + E]` features of the batch states themselves.
    pub fn state_features(&self, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        Ok(self.state_parts(batch)?.concat())
    }

    pub fn state_parts(&self, batch: &StateBatch) -> Result<StateParts<B>> {
        self.check_batch(batch)?;

        let b = batch.len();
        let mut path_rows = Vec::with_capacity(b);
        let mut links = Vec::with_capacity(b);
        let mut speeds = Vec::with_capacity(b);
        for (state, destination, time_step) in batch.rows() {
            path_rows.push(self.path_row(state, destination));
            links.push(state as i64);
            speeds.push(self.speed(state, time_step));
        }

        Ok(StateParts {
            speed: Tensor::<B, 1>::from_floats(speeds.as_slice(), &self.device).reshape([b, 1]),
            path: self.path_rows(&path_rows),
            edge: self.edge_rows(&links),
        })
    }

    /// `[B, action_num]` validity mask rows of `states`.
    pub fn policy_mask_rows(&self, states: &[LinkId]) -> Tensor<B, 2, Int> {
        self.policy_mask.clone().select(0, self.index_tensor(states))
    }

    /// `[B, action_num + 1]` padded validity mask rows of `states`.
    pub(crate) fn padded_mask_rows(&self, states: &[LinkId]) -> Tensor<B, 2, Int> {
        self.policy_mask_pad.clone().select(0, self.index_tensor(states))
    }

    /// Row of the flattened path table holding `(link, destination)`.
    pub(crate) fn path_row(&self, link: LinkId, destination: LinkId) -> i64 {
        (link * self.dims.n_destinations + destination) as i64
    }

    /// `[N, P]` path feature rows.
    pub(crate) fn path_rows(&self, rows: &[i64]) -> Tensor<B, 2> {
        let index = Tensor::<B, 1, Int>::from_ints(rows, &self.device);
        self.path_feature.clone().select(0, index)
    }

    /// `[N, E]` edge feature rows.
    pub(crate) fn edge_rows(&self, links: &[i64]) -> Tensor<B, 2> {
        let index = Tensor::<B, 1, Int>::from_ints(links, &self.device);
        self.edge_feature.clone().select(0, index)
    }

    fn index_tensor(&self, states: &[LinkId]) -> Tensor<B, 1, Int> {
        let index: Vec<i64> = states.iter().map(|&state| state as i64).collect();
        Tensor::<B, 1, Int>::from_ints(index.as_slice(), &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBackend, chain_store, chain_tables};

    #[test]
    fn test_speed_defaults_to_zero() {
        let mut speed = SpeedObservations::new();
        speed.insert(2, 7, 31.5);

        assert_eq!(speed.get(2, 7), 31.5);
        assert_eq!(speed.get(2, 8), 0.0);
        assert_eq!(speed.get(99, 7), 0.0);
    }

    #[test]
    fn test_padded_rows() {
        let store = chain_store();
        let dims = store.dims();

        for state in 0..dims.n_states {
            let neighbors = store.padded_neighbors(state);
            let mask = store.padded_mask(state);
            assert_eq!(neighbors.len(), dims.action_num + 1);
            assert_eq!(neighbors[dims.action_num], state);
            assert_eq!(mask.len(), dims.action_num + 1);
            assert_eq!(mask[dims.action_num], 0);
        }
    }

    #[test]
    fn test_dims() {
        let dims = chain_store().dims();
        assert_eq!(dims.n_states, 5);
        assert_eq!(dims.action_num, 8);
        assert_eq!(dims.neighbor_feature_dim(), 1 + 2 + 1 + 1);
        assert_eq!(dims.state_feature_dim(), 1 + 2 + 1);
        assert_eq!(dims.static_feature_dim(), 2 + 1 + 1);
    }

    #[test]
    fn test_rejects_wrong_action_count() {
        let mut tables = chain_tables();
        for row in tables.action_state.iter_mut() {
            row.pop();
        }
        for row in tables.policy_mask.iter_mut() {
            row.pop();
        }

        let result = FeatureStore::<TestBackend>::new(tables, SpeedObservations::new(), &Default::default());
        assert!(matches!(result, Err(AirlError::Shape(_))));
    }

    #[test]
    fn test_rejects_neighbor_outside_tables() {
        let mut tables = chain_tables();
        tables.action_state[1][3] = 42;

        let result = FeatureStore::<TestBackend>::new(tables, SpeedObservations::new(), &Default::default());
        assert!(matches!(
            result,
            Err(AirlError::IndexOutOfRange { kind: "neighbor", index: 42, .. })
        ));
    }

    #[test]
    fn test_rejects_ragged_path_block() {
        let mut tables = chain_tables();
        tables.path_feature[2][1].push(0.5);

        let result = FeatureStore::<TestBackend>::new(tables, SpeedObservations::new(), &Default::default());
        assert!(matches!(result, Err(AirlError::Shape(_))));
    }

    #[test]
    fn test_state_features() {
        let store = chain_store();
        let batch = StateBatch::new(vec![1, 2], vec![3, 3], vec![0, 1]).unwrap();

        let features = store.state_features(&batch).unwrap();
        assert_eq!(features.dims(), [2, 4]);

        let values: Vec<f32> = features.into_data().to_vec().unwrap();
        // speed, path (state, destination), edge
        assert_eq!(&values[0..4], &[10.0, 1.0, 3.0, 0.1]);
        // state 2 has no speed at time step 1
        assert_eq!(&values[4..8], &[0.0, 2.0, 3.0, 0.2]);
    }

    #[test]
    fn test_state_features_rejects_unknown_destination() {
        let store = chain_store();
        let batch = StateBatch::single(0, 9, 0);
        assert!(store.state_features(&batch).is_err());
    }

    #[test]
    fn test_policy_mask_rows() {
        let store = chain_store();
        let rows = store.policy_mask_rows(&[0, 3]);
        assert_eq!(rows.dims(), [2, 8]);

        let values: Vec<i64> = rows.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(values[0], 1);
        assert!(values[1..8].iter().all(|&v| v == 0));
        assert!(values[8..16].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_to_device_keeps_tables() {
        let store = chain_store();
        let moved = store.to_device(&Default::default());

        assert_eq!(moved.dims(), store.dims());
        assert_eq!(moved.padded_neighbors(2), store.padded_neighbors(2));
        assert_eq!(moved.speed(0, 0), store.speed(0, 0));
    }
}
