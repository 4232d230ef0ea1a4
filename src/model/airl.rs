//! AIRL discriminator: reward and shaping terms over transitions
//!
//! ```text
//! f(s, a, s') = r(s, a) + gamma * h(s') - h(s)
//! logit       = f(s, a, s') - log pi(a | s)
//! reward      = -log sigmoid(-logit)
//! ```

use burn::module::Module;
use burn::prelude::*;
use burn::tensor::activation::log_sigmoid;

use crate::infra::{self, AirlError, LinkId};

use super::backbone::{CnnConfig, ConvBackbone, MlpHead};
use super::batch::{StateBatch, TransitionBatch, check_actions, one_hot};
use super::features::{FeatureDims, FeatureStore, StateParts};
use super::neighborhood::NeighborParts;

/// Configuration for the AIRL discriminator
#[derive(Debug, Config)]
pub struct AirlConfig {
    /// Discount factor of the shaping term
    pub gamma: f64,
    /// Layer widths shared by the reward and value branches
    pub network: CnnConfig,
}

impl Default for AirlConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            network: CnnConfig::default(),
        }
    }
}

/// Tensors the AIRL logit is computed from, with the ids they came from.
#[derive(Debug, Clone)]
pub struct AirlInputFeatures<B: Backend> {
    /// Neighborhood of `s`, adjacency-slot order
    pub neighbors: NeighborParts<B>,
    /// Features of `s`
    pub state: StateParts<B>,
    /// Features of `s'`
    pub next_state: StateParts<B>,
    pub states: Vec<LinkId>,
    pub next_states: Vec<LinkId>,
    pub time_steps: Vec<u32>,
}

#[derive(Module, Debug)]
pub struct DiscriminatorAirlCnn<B: Backend> {
    backbone: ConvBackbone<B>,
    /// `r(s, a)`
    reward_head: MlpHead<B>,
    /// `h(s)`
    value: MlpHead<B>,
    action_num: usize,
    gamma: f64,
}

impl<B: Backend> DiscriminatorAirlCnn<B> {
    pub fn new(device: &B::Device, dims: &FeatureDims, config: &AirlConfig) -> Self {
        let backbone = ConvBackbone::new(device, dims.neighbor_feature_dim(), &config.network);
        let reward_head = MlpHead::new(device, backbone.out_size() + dims.action_num, 1, &config.network);
        let value = MlpHead::new(device, dims.state_feature_dim(), 1, &config.network);

        Self {
            backbone,
            reward_head,
            value,
            action_num: dims.action_num,
            gamma: config.gamma,
        }
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// `r(s, a)`, `[B, 1]`
    pub fn reward_term(
        &self,
        store: &FeatureStore<B>,
        batch: &StateBatch,
        actions: &[usize],
    ) -> infra::Result<Tensor<B, 2>> {
        check_actions(batch, actions)?;
        let grid = store.neighborhood(batch)?;
        self.reward_from_grid(grid, actions, store.device())
    }

    /// `h(s)`, `[B, 1]`
    pub fn potential(&self, store: &FeatureStore<B>, batch: &StateBatch) -> infra::Result<Tensor<B, 2>> {
        Ok(self.value.forward(store.state_features(batch)?))
    }

    /// `f(s, a, s')`, `[B, 1]`
    pub fn score(&self, store: &FeatureStore<B>, transitions: &TransitionBatch) -> infra::Result<Tensor<B, 2>> {
        let reward = self.reward_term(store, transitions.states(), transitions.actions())?;
        let value = self.potential(store, transitions.states())?;
        let next_value = self.potential(store, &transitions.next()?)?;

        Ok(self.shaped(reward, value, next_value))
    }

    /// `f(s, a, s') - log pi(a | s)`, `[B, 1]`. `log_pis` is `[B, 1]`.
    pub fn forward(
        &self,
        store: &FeatureStore<B>,
        transitions: &TransitionBatch,
        log_pis: Tensor<B, 2>,
    ) -> infra::Result<Tensor<B, 2>> {
        check_log_pis(&log_pis, transitions.len())?;
        Ok(self.score(store, transitions)? - log_pis)
    }

    /// `-log sigmoid(-logit)`, detached, `[B, 1]`
    pub fn calculate_reward(
        &self,
        store: &FeatureStore<B>,
        transitions: &TransitionBatch,
        log_pis: Tensor<B, 2>,
    ) -> infra::Result<Tensor<B, 2>> {
        let logit = self.forward(store, transitions, log_pis)?;
        Ok(log_sigmoid(logit.neg()).neg().detach())
    }

    /// Gather every tensor the logit depends on, for attribution.
    pub fn input_features(
        &self,
        store: &FeatureStore<B>,
        transitions: &TransitionBatch,
    ) -> infra::Result<AirlInputFeatures<B>> {
        let states = transitions.states();

        Ok(AirlInputFeatures {
            neighbors: store.neighbor_parts(states)?,
            state: store.state_parts(states)?,
            next_state: store.state_parts(&transitions.next()?)?,
            states: states.states().to_vec(),
            next_states: transitions.next_states().to_vec(),
            time_steps: states.time_steps().to_vec(),
        })
    }

    /// Same logit as [`Self::forward`], computed from gathered features.
    pub fn forward_with_features(
        &self,
        features: &AirlInputFeatures<B>,
        actions: &[usize],
        log_pis: Tensor<B, 2>,
    ) -> infra::Result<Tensor<B, 2>> {
        let rows = features.states.len();
        if actions.len() != rows {
            return Err(AirlError::shape(format!("{} actions for {} states", actions.len(), rows)));
        }
        check_log_pis(&log_pis, rows)?;

        let device = features.state.speed.device();
        let reward = self.reward_from_grid(features.neighbors.grid(), actions, &device)?;
        let value = self.value.forward(features.state.concat());
        let next_value = self.value.forward(features.next_state.concat());

        Ok(self.shaped(reward, value, next_value) - log_pis)
    }

    fn reward_from_grid(
        &self,
        grid: Tensor<B, 4>,
        actions: &[usize],
        device: &B::Device,
    ) -> infra::Result<Tensor<B, 2>> {
        let actions = one_hot::<B>(actions, self.action_num, device)?;
        let x = Tensor::cat(vec![self.backbone.forward(grid), actions], 1);
        Ok(self.reward_head.forward(x))
    }

    fn shaped(&self, reward: Tensor<B, 2>, value: Tensor<B, 2>, next_value: Tensor<B, 2>) -> Tensor<B, 2> {
        reward + next_value.mul_scalar(self.gamma) - value
    }
}

fn check_log_pis<B: Backend>(log_pis: &Tensor<B, 2>, rows: usize) -> infra::Result<()> {
    if log_pis.dims() != [rows, 1] {
        return Err(AirlError::shape(format!(
            "log_pis has shape {:?}, expected [{}, 1]",
            log_pis.dims(),
            rows
        )));
    }
    Ok(())
}
