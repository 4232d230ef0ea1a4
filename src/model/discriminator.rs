//! GAN discriminator: probability that a state-action pair came from the expert
//!
//! Scores the static neighborhood grid (path, edge, mask). Speed is not an
//! input, so time steps in the batch do not change the score.

use burn::module::Module;
use burn::prelude::*;
use burn::tensor::activation::{log_sigmoid, sigmoid};

use crate::infra::Result;

use super::backbone::{CnnConfig, ConvBackbone, MlpHead};
use super::batch::{StateBatch, check_actions, one_hot};
use super::features::{FeatureDims, FeatureStore};

#[derive(Module, Debug)]
pub struct DiscriminatorCnn<B: Backend> {
    backbone: ConvBackbone<B>,
    head: MlpHead<B>,
    action_num: usize,
}

impl<B: Backend> DiscriminatorCnn<B> {
    pub fn new(device: &B::Device, dims: &FeatureDims, config: &CnnConfig) -> Self {
        let backbone = ConvBackbone::new(device, dims.static_feature_dim(), config);
        let head = MlpHead::new(device, backbone.out_size() + dims.action_num, 1, config);

        Self {
            backbone,
            head,
            action_num: dims.action_num,
        }
    }

    /// Pre-sigmoid score, `[B, 1]`
    pub fn logit(&self, store: &FeatureStore<B>, batch: &StateBatch, actions: &[usize]) -> Result<Tensor<B, 2>> {
        check_actions(batch, actions)?;
        let grid = store.static_neighborhood(batch)?;
        let actions = one_hot::<B>(actions, self.action_num, store.device())?;

        let x = Tensor::cat(vec![self.backbone.forward(grid), actions], 1);
        Ok(self.head.forward(x))
    }

    /// `D(s, a)` in (0, 1), `[B, 1]`
    pub fn forward(&self, store: &FeatureStore<B>, batch: &StateBatch, actions: &[usize]) -> Result<Tensor<B, 2>> {
        Ok(sigmoid(self.logit(store, batch, actions)?))
    }

    /// `-ln D(s, a)`, detached, `[B, 1]`
    pub fn calculate_reward(
        &self,
        store: &FeatureStore<B>,
        batch: &StateBatch,
        actions: &[usize],
    ) -> Result<Tensor<B, 2>> {
        let logit = self.logit(store, batch, actions)?;
        Ok(log_sigmoid(logit).neg().detach())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBackend, chain_store, column};

    fn discriminator() -> (DiscriminatorCnn<TestBackend>, FeatureStore<TestBackend>) {
        let store = chain_store();
        let model = DiscriminatorCnn::new(&Default::default(), &store.dims(), &CnnConfig::default());
        (model, store)
    }

    #[test]
    fn test_probability_in_open_interval() {
        let (model, store) = discriminator();
        let batch = StateBatch::broadcast(vec![0, 1, 2, 3], 3, 0).unwrap();

        let probs = model.forward(&store, &batch, &[0, 0, 0, 4]).unwrap();
        assert_eq!(probs.dims(), [4, 1]);
        assert!(column(probs).iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_reward_is_negative_log_probability() {
        let (model, store) = discriminator();
        let batch = StateBatch::new(vec![0, 2], vec![3, 3], vec![0, 1]).unwrap();

        let probs = column(model.forward(&store, &batch, &[0, 1]).unwrap());
        let rewards = column(model.calculate_reward(&store, &batch, &[0, 1]).unwrap());
        for (p, r) in probs.iter().zip(rewards.iter()) {
            assert!((r - (-p.ln())).abs() < 1e-4);
        }
    }

    #[test]
    fn test_scores_static_grid() {
        let (model, store) = discriminator();
        let dims = store.dims();
        assert_eq!(dims.static_feature_dim(), 4);

        // conv1 takes path, edge and mask only; the full grid has one channel too many
        let grid = store.static_neighborhood(&StateBatch::single(1, 3, 0)).unwrap();
        assert_eq!(grid.dims()[1], dims.static_feature_dim());
        assert_eq!(model.backbone.forward(grid).dims(), [1, 30]);
    }

    #[test]
    fn test_ignores_time_step() {
        let (model, store) = discriminator();
        let early = StateBatch::new(vec![0, 1], vec![3, 3], vec![0, 0]).unwrap();
        let late = StateBatch::new(vec![0, 1], vec![3, 3], vec![1, 2]).unwrap();

        // links 1 and 2 only have speed observations at time step 0
        let a = column(model.logit(&store, &early, &[0, 0]).unwrap());
        let b = column(model.logit(&store, &late, &[0, 0]).unwrap());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_action_count_mismatch() {
        let (model, store) = discriminator();
        let batch = StateBatch::broadcast(vec![0, 1], 3, 0).unwrap();

        assert!(model.logit(&store, &batch, &[0]).is_err());
        assert!(model.logit(&store, &batch, &[0, 8]).is_err());
    }
}
