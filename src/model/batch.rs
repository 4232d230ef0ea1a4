//! Batched queries handed to the networks, shape-checked on construction

use burn::prelude::*;

use crate::infra::{AirlError, LinkId, Result, Transition, check_index};

/// A batch of `(state, destination, time step)` triples.
///
/// All three columns have the same, non-zero length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBatch {
    states: Vec<LinkId>,
    destinations: Vec<LinkId>,
    time_steps: Vec<u32>,
}

impl StateBatch {
    pub fn new(states: Vec<LinkId>, destinations: Vec<LinkId>, time_steps: Vec<u32>) -> Result<Self> {
        if states.is_empty() {
            return Err(AirlError::EmptyInput("state batch has no rows".to_string()));
        }
        if destinations.len() != states.len() || time_steps.len() != states.len() {
            return Err(AirlError::shape(format!(
                "state batch columns differ in length: states={}, destinations={}, time_steps={}",
                states.len(),
                destinations.len(),
                time_steps.len()
            )));
        }

        Ok(Self {
            states,
            destinations,
            time_steps,
        })
    }

    /// Every state shares one destination and time step.
    pub fn broadcast(states: Vec<LinkId>, destination: LinkId, time_step: u32) -> Result<Self> {
        let n = states.len();
        Self::new(states, vec![destination; n], vec![time_step; n])
    }

    pub fn single(state: LinkId, destination: LinkId, time_step: u32) -> Self {
        Self {
            states: vec![state],
            destinations: vec![destination],
            time_steps: vec![time_step],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[LinkId] {
        &self.states
    }

    pub fn destinations(&self) -> &[LinkId] {
        &self.destinations
    }

    pub fn time_steps(&self) -> &[u32] {
        &self.time_steps
    }

    /// Same destinations and time steps, different states.
    pub fn with_states(&self, states: Vec<LinkId>) -> Result<Self> {
        Self::new(states, self.destinations.clone(), self.time_steps.clone())
    }

    pub fn rows(&self) -> impl Iterator<Item = (LinkId, LinkId, u32)> + '_ {
        self.states
            .iter()
            .zip(self.destinations.iter())
            .zip(self.time_steps.iter())
            .map(|((&state, &destination), &time_step)| (state, destination, time_step))
    }
}

/// A batch of `(s, a, s')` transitions sharing the row layout of a
/// [`StateBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionBatch {
    states: StateBatch,
    actions: Vec<usize>,
    next_states: Vec<LinkId>,
}

impl TransitionBatch {
    pub fn new(states: StateBatch, actions: Vec<usize>, next_states: Vec<LinkId>) -> Result<Self> {
        if actions.len() != states.len() || next_states.len() != states.len() {
            return Err(AirlError::shape(format!(
                "transition batch columns differ in length: states={}, actions={}, next_states={}",
                states.len(),
                actions.len(),
                next_states.len()
            )));
        }

        Ok(Self {
            states,
            actions,
            next_states,
        })
    }

    /// Build from expert transitions that all head to `destination`.
    pub fn from_transitions(transitions: &[Transition], destination: LinkId) -> Result<Self> {
        let states = StateBatch::new(
            transitions.iter().map(|t| t.state).collect(),
            vec![destination; transitions.len()],
            transitions.iter().map(|t| t.time_step).collect(),
        )?;

        Self::new(
            states,
            transitions.iter().map(|t| t.action).collect(),
            transitions.iter().map(|t| t.next_state).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &StateBatch {
        &self.states
    }

    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    pub fn next_states(&self) -> &[LinkId] {
        &self.next_states
    }

    /// The `s'` side of the batch, evaluated at the same destination and
    /// time step as `s`.
    pub fn next(&self) -> Result<StateBatch> {
        self.states.with_states(self.next_states.clone())
    }
}

/// One action per batch row.
pub(crate) fn check_actions(batch: &StateBatch, actions: &[usize]) -> Result<()> {
    if actions.len() != batch.len() {
        return Err(AirlError::shape(format!(
            "{} actions for {} states",
            actions.len(),
            batch.len()
        )));
    }
    Ok(())
}

/// `[B, action_num]` one-hot encoding of `actions`.
pub(crate) fn one_hot<B: Backend>(
    actions: &[usize],
    action_num: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let mut data = vec![0.0f32; actions.len() * action_num];
    for (row, &action) in actions.iter().enumerate() {
        check_index("action", action, action_num)?;
        data[row * action_num + action] = 1.0;
    }

    Ok(Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([actions.len(), action_num]))
}

/// `[B, 1]` action indices for `gather` along the action axis.
pub(crate) fn action_indices<B: Backend>(
    actions: &[usize],
    action_num: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let mut data = Vec::with_capacity(actions.len());
    for &action in actions {
        check_index("action", action, action_num)?;
        data.push(action as i64);
    }

    Ok(Tensor::<B, 1, Int>::from_ints(data.as_slice(), device).reshape([actions.len(), 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_state_batch_rejects_mismatched_columns() {
        let result = StateBatch::new(vec![0, 1], vec![3], vec![0, 0]);
        assert!(matches!(result, Err(AirlError::Shape(_))));
    }

    #[test]
    fn test_state_batch_rejects_empty() {
        let result = StateBatch::broadcast(vec![], 3, 0);
        assert!(matches!(result, Err(AirlError::EmptyInput(_))));
    }

    #[test]
    fn test_transition_batch_next() {
        let states = StateBatch::new(vec![0, 1], vec![3, 3], vec![5, 6]).unwrap();
        let batch = TransitionBatch::new(states, vec![0, 0], vec![1, 2]).unwrap();

        let next = batch.next().unwrap();
        assert_eq!(next.states(), &[1, 2]);
        assert_eq!(next.destinations(), &[3, 3]);
        assert_eq!(next.time_steps(), &[5, 6]);
    }

    #[test]
    fn test_from_transitions() {
        let transitions = vec![
            Transition {
                state: 0,
                action: 2,
                next_state: 1,
                time_step: 4,
            },
            Transition {
                state: 1,
                action: 0,
                next_state: 2,
                time_step: 4,
            },
        ];
        let batch = TransitionBatch::from_transitions(&transitions, 2).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.actions(), &[2, 0]);
        assert_eq!(batch.states().destinations(), &[2, 2]);
    }

    #[test]
    fn test_one_hot() {
        let device = Default::default();
        let encoded = one_hot::<TestBackend>(&[2, 0], 3, &device).unwrap();
        let values: Vec<f32> = encoded.into_data().to_vec().unwrap();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        assert!(one_hot::<TestBackend>(&[3], 3, &device).is_err());
    }
}
