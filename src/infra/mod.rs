mod error;
mod graph;
mod types;

pub use error::{AirlError, Result};
pub(crate) use error::check_index;
pub use graph::{ActionGraph, RoadGraph};
pub use types::{ExpertTrajectory, LinkId, OdQuery, Trajectory, Transition};
