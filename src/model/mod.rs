//! Scoring networks for adversarial route-choice imitation
//!
//! Every network reads the same local picture of a road link: the link and
//! its eight action successors laid out on a 3x3 grid, one channel per
//! feature.
//!
//! # Architecture
//!
//! ```text
//! StateBatch (state, destination, time step)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FeatureStore                                               │
//! │  - padded adjacency and mask, path / edge tables, speeds    │
//! │  - neighborhood::assemble → [B, 1 + P + E + 1, 3, 3]        │
//! │  - static grid (no speed) → [B, P + E + 1, 3, 3]            │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConvBackbone → [B, 30]                                     │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ├──► PolicyCnn            logits → masked softmax
//!     ├──► DiscriminatorCnn     static grid ⊕ one-hot(a) → sigmoid
//!     └──► DiscriminatorAirlCnn ⊕ one-hot(a) → r(s, a)
//!                               state features → h(s), h(s')
//! ```

pub mod airl;
pub mod backbone;
pub mod batch;
pub mod discriminator;
pub mod features;
pub mod neighborhood;
pub mod policy;

use burn::prelude::*;

use crate::infra::{AirlError, Result};

pub use airl::{AirlConfig, AirlInputFeatures, DiscriminatorAirlCnn};
pub use backbone::{CnnConfig, ConvBackbone, MlpHead};
pub use batch::{StateBatch, TransitionBatch};
pub use discriminator::DiscriminatorCnn;
pub use features::{FeatureDims, FeatureStore, FeatureTables, SpeedObservations, StateParts};
pub use neighborhood::{GRID_SIDE, GRID_SLOTS, NEIGHBOR_LAYOUT, NeighborParts, inverse_layout};
pub use policy::{BoundPolicy, FisherInfo, MASKED_LOGIT, PolicyCnn, mask_invalid};

/// Copy a float tensor to the host, row-major.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| AirlError::Tensor(format!("{:?}", e)))
}
