//! Neighborhood assembler - lays the neighbors of a link out on a 3x3 grid
//!
//! Adjacency slot `i < 8` holds the link reached by action `i`, slot 8 the
//! link itself. `NEIGHBOR_LAYOUT[cell]` names the slot drawn at grid cell
//! `cell` (row-major), which puts the link in the center and its neighbors
//! clockwise around it:
//!
//! ```text
//! 7 0 1
//! 6 8 2
//! 5 4 3
//! ```
//!
//! Channel order is speed, path features, edge features, mask. Both the
//! channel order and the layout are part of the trained weights' contract.
//! The GAN discriminator sees the static grid, the same channels without
//! speed.

use burn::prelude::*;

use crate::infra::Result;

use super::batch::StateBatch;
use super::features::FeatureStore;

/// Cells in the neighborhood grid.
pub const GRID_SLOTS: usize = 9;

/// Side length of the neighborhood grid.
pub const GRID_SIDE: usize = 3;

/// Adjacency slot shown at each grid cell, row-major.
pub const NEIGHBOR_LAYOUT: [usize; GRID_SLOTS] = [7, 0, 1, 6, 8, 2, 5, 4, 3];

/// Grid cell showing each adjacency slot.
pub fn inverse_layout() -> [usize; GRID_SLOTS] {
    let mut inverse = [0; GRID_SLOTS];
    for (cell, &slot) in NEIGHBOR_LAYOUT.iter().enumerate() {
        inverse[slot] = cell;
    }
    inverse
}

/// Per-slot neighbor features, split by block, in adjacency-slot order.
#[derive(Debug, Clone)]
pub struct NeighborParts<B: Backend> {
    /// `[B, 9, 1]`
    pub speed: Tensor<B, 3>,
    /// `[B, 9, P]`
    pub path: Tensor<B, 3>,
    /// `[B, 9, E]`
    pub edge: Tensor<B, 3>,
    /// `[B, 9, 1]`
    pub mask: Tensor<B, 3>,
}

impl<B: Backend> NeighborParts<B> {
    /// `[B, 9, 1 + P + E + 1]`
    pub fn concat(&self) -> Tensor<B, 3> {
        Tensor::cat(
            vec![
                self.speed.clone(),
                self.path.clone(),
                self.edge.clone(),
                self.mask.clone(),
            ],
            2,
        )
    }

    /// `[B, 1 + P + E + 1, 3, 3]`
    pub fn grid(&self) -> Tensor<B, 4> {
        to_grid(self.concat())
    }

    /// `[B, P + E + 1, 3, 3]`, no speed channel
    pub fn static_grid(&self) -> Tensor<B, 4> {
        to_grid(Tensor::cat(
            vec![self.path.clone(), self.edge.clone(), self.mask.clone()],
            2,
        ))
    }
}

/// Gathers the neighbor feature blocks of every state in `batch`.
pub fn gather<B: Backend>(store: &FeatureStore<B>, batch: &StateBatch) -> Result<NeighborParts<B>> {
    store.check_batch(batch)?;

    let dims = store.dims();
    let b = batch.len();
    let mut neighbor_rows = Vec::with_capacity(b * GRID_SLOTS);
    let mut path_rows = Vec::with_capacity(b * GRID_SLOTS);
    let mut speeds = Vec::with_capacity(b * GRID_SLOTS);

    for (state, destination, time_step) in batch.rows() {
        for &neighbor in store.padded_neighbors(state) {
            neighbor_rows.push(neighbor as i64);
            path_rows.push(store.path_row(neighbor, destination));
            // sparse point lookup, not a dense gather
            speeds.push(store.speed(neighbor, time_step));
        }
    }

    let speed = Tensor::<B, 1>::from_floats(speeds.as_slice(), store.device())
        .reshape([b, GRID_SLOTS, 1]);
    let path = store
        .path_rows(&path_rows)
        .reshape([b, GRID_SLOTS, dims.path_dim]);
    let edge = store
        .edge_rows(&neighbor_rows)
        .reshape([b, GRID_SLOTS, dims.edge_dim]);
    let mask = store
        .padded_mask_rows(batch.states())
        .float()
        .reshape([b, GRID_SLOTS, 1]);

    Ok(NeighborParts {
        speed,
        path,
        edge,
        mask,
    })
}

/// `[B, 9, F]` in slot order -> `[B, F, 3, 3]` in grid order.
pub fn to_grid<B: Backend>(features: Tensor<B, 3>) -> Tensor<B, 4> {
    let [batch, _, channels] = features.dims();
    let layout: Vec<i64> = NEIGHBOR_LAYOUT.iter().map(|&slot| slot as i64).collect();
    let layout = Tensor::<B, 1, Int>::from_ints(layout.as_slice(), &features.device());

    features
        .select(1, layout)
        .reshape([batch, GRID_SIDE, GRID_SIDE, channels])
        .permute([0, 3, 1, 2])
}

/// Full assembly: gather, reorder, reshape.
pub fn assemble<B: Backend>(store: &FeatureStore<B>, batch: &StateBatch) -> Result<Tensor<B, 4>> {
    Ok(gather(store, batch)?.grid())
}
