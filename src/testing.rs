//! Shared fixtures for unit tests
//!
//! A chain of four links `0 -> 1 -> 2 -> 3` reached through action 0, plus
//! the padding state 4. Every other action leads to the padding state.

use burn::prelude::*;

use crate::eval::ActionProbability;
use crate::infra::{LinkId, Result, RoadGraph};
use crate::model::{FeatureStore, FeatureTables, SpeedObservations};

pub type TestBackend = burn::backend::NdArray;

pub const CHAIN_LINKS: usize = 4;
pub const CHAIN_PAD: LinkId = 4;
pub const CHAIN_ACTIONS: usize = 8;
pub const CHAIN_DESTINATIONS: usize = 5;

fn chain_action_state() -> Vec<Vec<LinkId>> {
    (0..=CHAIN_PAD)
        .map(|state| {
            let mut row = vec![CHAIN_PAD; CHAIN_ACTIONS];
            if state + 1 < CHAIN_LINKS {
                row[0] = state + 1;
            }
            row
        })
        .collect()
}

pub fn chain_tables() -> FeatureTables {
    let action_state = chain_action_state();
    let policy_mask = action_state
        .iter()
        .map(|row| row.iter().map(|&next| next != CHAIN_PAD).collect())
        .collect();

    let path_feature = (0..=CHAIN_PAD)
        .map(|state| {
            (0..CHAIN_DESTINATIONS)
                .map(|destination| {
                    if state == CHAIN_PAD {
                        vec![0.0, 0.0]
                    } else {
                        vec![state as f32, destination as f32]
                    }
                })
                .collect()
        })
        .collect();

    let edge_feature = (0..=CHAIN_PAD)
        .map(|state| {
            if state == CHAIN_PAD {
                vec![0.0]
            } else {
                vec![state as f32 / 10.0]
            }
        })
        .collect();

    FeatureTables {
        policy_mask,
        action_state,
        path_feature,
        edge_feature,
        pad_idx: Some(CHAIN_PAD),
    }
}

pub fn chain_speed() -> SpeedObservations {
    [((1, 0), 10.0), ((2, 0), 20.0), ((3, 1), 30.0)]
        .into_iter()
        .collect()
}

pub fn chain_store() -> FeatureStore<TestBackend> {
    FeatureStore::new(chain_tables(), chain_speed(), &Default::default())
        .expect("chain fixture is well formed")
}

/// The four real links of the chain, without the padding row.
pub fn chain_graph() -> RoadGraph {
    let mut rows = chain_action_state();
    rows.truncate(CHAIN_LINKS);
    RoadGraph::new(rows, CHAIN_PAD).expect("chain graph is well formed")
}

/// Always picks action 0.
pub struct ForwardPolicy;

impl ActionProbability for ForwardPolicy {
    fn action_num(&self) -> usize {
        CHAIN_ACTIONS
    }

    fn action_probs(&self, states: &[LinkId], _destination: LinkId, _time_step: u32) -> Result<Vec<f32>> {
        let mut probs = vec![0.0; states.len() * CHAIN_ACTIONS];
        for row in 0..states.len() {
            probs[row * CHAIN_ACTIONS] = 1.0;
        }
        Ok(probs)
    }
}

/// `[B]` floats of a `[B, 1]` tensor.
pub fn column<B: Backend>(tensor: Tensor<B, 2>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .expect("float tensor")
}
