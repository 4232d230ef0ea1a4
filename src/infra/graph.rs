//! Road-network action graph: the environment contract consumed by the decoder

use super::error::{AirlError, Result, check_index};
use super::types::LinkId;

/// What the decoder needs from the environment: for each real link and
/// action, the link the action leads to, or `pad_idx` when the action is
/// invalid there.
pub trait ActionGraph {
    /// Number of real links (padding state excluded).
    fn n_links(&self) -> usize;

    fn action_num(&self) -> usize;

    fn pad_idx(&self) -> LinkId;

    fn next_state(&self, state: LinkId, action: usize) -> LinkId;
}

/// Table-backed action graph.
#[derive(Debug, Clone)]
pub struct RoadGraph {
    state_action: Vec<Vec<LinkId>>,
    action_num: usize,
    pad_idx: LinkId,
}

impl RoadGraph {
    /// `state_action[state][action]` is the successor link or `pad_idx`.
    pub fn new(state_action: Vec<Vec<LinkId>>, pad_idx: LinkId) -> Result<Self> {
        let action_num = state_action.first().map(|row| row.len()).unwrap_or(0);
        if action_num == 0 {
            return Err(AirlError::EmptyInput(
                "state-action table has no actions".to_string(),
            ));
        }

        let n_links = state_action.len();
        for (state, row) in state_action.iter().enumerate() {
            if row.len() != action_num {
                return Err(AirlError::shape(format!(
                    "state-action row {} has {} actions, expected {}",
                    state,
                    row.len(),
                    action_num
                )));
            }
            for &next in row {
                if next != pad_idx {
                    check_index("successor link", next, n_links)?;
                }
            }
        }

        Ok(Self {
            state_action,
            action_num,
            pad_idx,
        })
    }

    pub fn state_action(&self) -> &[Vec<LinkId>] {
        &self.state_action
    }

    /// Validity mask derived from the adjacency: an action is valid when it
    /// leads somewhere.
    pub fn policy_mask(&self) -> Vec<Vec<bool>> {
        self.state_action
            .iter()
            .map(|row| row.iter().map(|&next| next != self.pad_idx).collect())
            .collect()
    }
}

impl ActionGraph for RoadGraph {
    fn n_links(&self) -> usize {
        self.state_action.len()
    }

    fn action_num(&self) -> usize {
        self.action_num
    }

    fn pad_idx(&self) -> LinkId {
        self.pad_idx
    }

    fn next_state(&self, state: LinkId, action: usize) -> LinkId {
        self.state_action
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(self.pad_idx)
    }
}
