//! Route-choice policy network over the 3x3 neighborhood grid

use burn::module::Module;
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::eval::ActionProbability;
use crate::infra::{LinkId, Result};

use super::backbone::{CnnConfig, ConvBackbone, MlpHead};
use super::batch::{StateBatch, action_indices, check_actions};
use super::features::{FeatureDims, FeatureStore};
use super::to_host;

/// Logit given to actions that do not exist at a state.
pub const MASKED_LOGIT: f32 = -1e32;

/// Replace logits of invalid actions. `mask` is 1 where the action exists.
pub fn mask_invalid<B: Backend>(logits: Tensor<B, 2>, mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    logits.mask_fill(mask.equal_elem(0), MASKED_LOGIT)
}

/// Log-softmax along the action axis, shifted by the row maximum so rows
/// whose actions are all masked stay finite.
fn log_softmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    let shifted = logits.clone() - logits.detach().max_dim(1);
    shifted.clone() - shifted.exp().sum_dim(1).log()
}

/// Inputs of the natural-gradient step.
#[derive(Debug, Clone)]
pub struct FisherInfo<B: Backend> {
    /// `[B * A]` inverse action probabilities, detached
    pub m: Tensor<B, 1>,
    /// `[B, A]`
    pub action_prob: Tensor<B, 2>,
}

/// Policy CNN: backbone -> fc -> fc -> fc(action_num) logits
///
/// Every call takes the [`FeatureStore`] the batch ids refer to.
#[derive(Module, Debug)]
pub struct PolicyCnn<B: Backend> {
    backbone: ConvBackbone<B>,
    head: MlpHead<B>,
    action_num: usize,
}

impl<B: Backend> PolicyCnn<B> {
    pub fn new(device: &B::Device, dims: &FeatureDims, config: &CnnConfig) -> Self {
        let backbone = ConvBackbone::new(device, dims.neighbor_feature_dim(), config);
        let head = MlpHead::new(device, backbone.out_size(), dims.action_num, config);

        Self {
            backbone,
            head,
            action_num: dims.action_num,
        }
    }

    pub fn action_num(&self) -> usize {
        self.action_num
    }

    /// Raw logits, `[B, A]`
    pub fn forward(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        let grid = store.neighborhood(batch)?;
        Ok(self.head.forward(self.backbone.forward(grid)))
    }

    /// Logits with invalid actions set to [`MASKED_LOGIT`], `[B, A]`
    pub fn masked_logits(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        let logits = self.forward(store, batch)?;
        Ok(mask_invalid(logits, store.policy_mask_rows(batch.states())))
    }

    /// `[B, A]`, rows sum to 1, masked actions get 0.
    pub fn action_prob(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        Ok(softmax(self.masked_logits(store, batch)?, 1))
    }

    /// `[B, A]`
    pub fn action_log_prob(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        Ok(log_softmax_rows(self.masked_logits(store, batch)?))
    }

    /// Draw one action per row from the masked distribution (Gumbel-max).
    ///
    /// `[B]` action indices.
    pub fn select_action(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 1, Int>> {
        let log_probs = self.action_log_prob(store, batch)?;
        let uniform = Tensor::<B, 2>::random(
            log_probs.shape(),
            burn::tensor::Distribution::Uniform(1e-10, 1.0),
            &log_probs.device(),
        );
        let gumbel = -(-uniform.log()).log();
        let action: Tensor<B, 2, Int> = (log_probs + gumbel).argmax(1);
        Ok(action.squeeze(1))
    }

    /// KL(detached current || current), summed over actions, `[B, 1]`.
    ///
    /// Zero in value; its gradient is what the trust-region step needs.
    pub fn kl(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 2>> {
        let log_p = self.action_log_prob(store, batch)?;
        let log_p_ref = log_p.clone().detach();
        let p_ref = log_p_ref.clone().exp();
        Ok((p_ref * (log_p_ref - log_p)).sum_dim(1))
    }

    /// `log pi(action | state)` for each row, `[B, 1]`
    pub fn log_prob(&self, store: &FeatureStore<B>, batch: &StateBatch, actions: &[usize]) -> Result<Tensor<B, 2>> {
        check_actions(batch, actions)?;
        let index = action_indices::<B>(actions, self.action_num, store.device())?;
        Ok(self.action_log_prob(store, batch)?.gather(1, index))
    }

    pub fn fim(&self, store: &FeatureStore<B>, batch: &StateBatch) -> Result<FisherInfo<B>> {
        let action_prob = self.action_prob(store, batch)?;
        let [rows, actions] = action_prob.dims();
        let m = action_prob
            .clone()
            .powf_scalar(-1.0)
            .detach()
            .reshape([rows * actions]);

        Ok(FisherInfo { m, action_prob })
    }

    /// Pair the network with the store its ids refer to.
    pub fn bind<'a>(&'a self, store: &'a FeatureStore<B>) -> BoundPolicy<'a, B> {
        BoundPolicy {
            policy: self,
            store,
        }
    }
}

/// A policy together with its feature store, usable by the decoder.
#[derive(Debug)]
pub struct BoundPolicy<'a, B: Backend> {
    policy: &'a PolicyCnn<B>,
    store: &'a FeatureStore<B>,
}

impl<B: Backend> ActionProbability for BoundPolicy<'_, B> {
    fn action_num(&self) -> usize {
        self.policy.action_num
    }

    fn action_probs(&self, states: &[LinkId], destination: LinkId, time_step: u32) -> Result<Vec<f32>> {
        let batch = StateBatch::broadcast(states.to_vec(), destination, time_step)?;
        to_host(self.policy.action_prob(self.store, &batch)?)
    }

    fn log_probs(&self, batch: &StateBatch, actions: &[usize]) -> Result<Vec<f32>> {
        to_host(self.policy.log_prob(self.store, batch, actions)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticNetwork;
    use crate::testing::{TestBackend, chain_store, column};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy() -> (PolicyCnn<TestBackend>, FeatureStore<TestBackend>) {
        let store = chain_store();
        let policy = PolicyCnn::new(&Default::default(), &store.dims(), &CnnConfig::default());
        (policy, store)
    }

    fn rows() -> StateBatch {
        StateBatch::broadcast(vec![0, 1, 2, 3], 3, 0).unwrap()
    }

    #[test]
    fn test_logits_shape() {
        let (policy, store) = policy();
        let logits = policy.forward(&store, &rows()).unwrap();
        assert_eq!(logits.dims(), [4, 8]);
    }

    #[test]
    fn test_mask_invalid() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0]], &device);
        let mask = Tensor::<TestBackend, 2, Int>::from_ints([[1, 0, 1]], &device);

        let values: Vec<f32> = mask_invalid(logits, mask).into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, MASKED_LOGIT, 3.0]);
    }

    #[test]
    fn test_action_prob_respects_mask() {
        let (policy, store) = policy();
        let probs: Vec<f32> = policy
            .action_prob(&store, &rows())
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();

        // states 0..3 only have action 0
        for row in 0..3 {
            assert!((probs[row * 8] - 1.0).abs() < 1e-6);
            assert!(probs[row * 8 + 1..(row + 1) * 8].iter().all(|&p| p == 0.0));
        }
        // no valid action at the end of the chain: uniform
        for &p in &probs[24..32] {
            assert!((p - 0.125).abs() < 1e-6);
        }
    }

    #[test]
    fn test_action_prob_rows_on_grid() {
        let mut rng = StdRng::seed_from_u64(3);
        let network = SyntheticNetwork::generate(5, 3, &mut rng).unwrap();
        let store =
            FeatureStore::<TestBackend>::new(network.tables().clone(), network.speed().clone(), &Default::default())
                .unwrap();
        let policy = PolicyCnn::new(&Default::default(), &store.dims(), &CnnConfig::default());
        let links: Vec<LinkId> = (0..network.n_links()).collect();

        // interior links keep all eight actions, corners three
        assert_eq!(store.padded_mask(12)[..8].iter().filter(|&&m| m == 1).count(), 8);
        assert_eq!(store.padded_mask(0)[..8].iter().filter(|&&m| m == 1).count(), 3);

        for destination in [0, 12, 24] {
            for time_step in 0..3 {
                let batch = StateBatch::broadcast(links.clone(), destination, time_step).unwrap();
                let probs: Vec<f32> = policy
                    .action_prob(&store, &batch)
                    .unwrap()
                    .into_data()
                    .to_vec()
                    .unwrap();

                for (link, row) in probs.chunks(8).enumerate() {
                    assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                    let mask = store.padded_mask(link);
                    for (action, &p) in row.iter().enumerate() {
                        if mask[action] == 0 {
                            assert!(p <= 1e-30);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_log_prob_is_finite() {
        let (policy, store) = policy();
        let log_probs = policy.action_log_prob(&store, &rows()).unwrap();
        let values: Vec<f32> = log_probs.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));

        let chosen = column(policy.log_prob(&store, &rows(), &[0, 0, 0, 5]).unwrap());
        assert!(chosen[0].abs() < 1e-5);
        assert!((chosen[3] - 0.125f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_log_prob_rejects_unknown_action() {
        let (policy, store) = policy();
        assert!(policy.log_prob(&store, &rows(), &[0, 0, 0, 8]).is_err());
    }

    #[test]
    fn test_select_action_never_picks_masked() {
        let (policy, store) = policy();
        let batch = StateBatch::broadcast(vec![0, 1, 2, 0, 1, 2], 3, 0).unwrap();

        for _ in 0..5 {
            let actions: Vec<i64> = policy
                .select_action(&store, &batch)
                .unwrap()
                .into_data()
                .convert::<i64>()
                .to_vec()
                .unwrap();
            assert!(actions.iter().all(|&a| a == 0));
        }
    }

    #[test]
    fn test_kl_of_policy_with_itself_is_zero() {
        let (policy, store) = policy();
        let kl = policy.kl(&store, &rows()).unwrap();
        assert_eq!(kl.dims(), [4, 1]);
        assert!(column(kl).iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn test_fim() {
        let (policy, store) = policy();
        let fisher = policy.fim(&store, &rows()).unwrap();
        assert_eq!(fisher.m.dims(), [32]);
        assert_eq!(fisher.action_prob.dims(), [4, 8]);

        let m: Vec<f32> = fisher.m.into_data().to_vec().unwrap();
        assert!((m[0] - 1.0).abs() < 1e-5);
        assert!((m[24] - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_bound_policy() {
        let (policy, store) = policy();
        let bound = policy.bind(&store);

        assert_eq!(bound.action_num(), 8);
        let probs = bound.action_probs(&[0, 1], 3, 0).unwrap();
        assert_eq!(probs.len(), 16);
        assert!((probs[8] - 1.0).abs() < 1e-6);
    }
}
