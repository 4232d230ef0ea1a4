use std::fmt;

/// Road link id; doubles as the RL state.
pub type LinkId = usize;

/// Ordered sequence of links from an origin towards a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Trajectory(Vec<LinkId>);

impl Trajectory {
    pub fn new(links: Vec<LinkId>) -> Self {
        Self(links)
    }

    pub fn origin(&self) -> Option<LinkId> {
        self.0.first().copied()
    }

    pub fn destination(&self) -> Option<LinkId> {
        self.0.last().copied()
    }

    pub fn links(&self) -> &[LinkId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Underscore-joined link ids, the format consumed by downstream tooling.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|link| link.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl From<Vec<LinkId>> for Trajectory {
    fn from(links: Vec<LinkId>) -> Self {
        Self(links)
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.encode())
    }
}

/// A routing query: where the trip starts, where it ends and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OdQuery {
    pub origin: LinkId,
    pub destination: LinkId,
    pub time_step: u32,
}

impl OdQuery {
    pub fn new(origin: LinkId, destination: LinkId, time_step: u32) -> Self {
        Self {
            origin,
            destination,
            time_step,
        }
    }
}

/// Ground-truth trajectory with the time step it was observed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertTrajectory {
    pub trajectory: Trajectory,
    pub time_step: u32,
}

impl ExpertTrajectory {
    pub fn new(links: Vec<LinkId>, time_step: u32) -> Self {
        Self {
            trajectory: Trajectory::new(links),
            time_step,
        }
    }

    /// The query this trajectory answers, if it has at least one link.
    pub fn query(&self) -> Option<OdQuery> {
        Some(OdQuery::new(
            self.trajectory.origin()?,
            self.trajectory.destination()?,
            self.time_step,
        ))
    }
}

/// One expert step `(s, a, s')` observed at `time_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: LinkId,
    pub action: usize,
    pub next_state: LinkId,
    pub time_step: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_encode() {
        let trajectory = Trajectory::new(vec![12, 7, 301]);
        assert_eq!(trajectory.encode(), "12_7_301");
        assert_eq!(trajectory.to_string(), "12_7_301");
        assert_eq!(trajectory.origin(), Some(12));
        assert_eq!(trajectory.destination(), Some(301));
    }

    #[test]
    fn test_expert_query() {
        let expert = ExpertTrajectory::new(vec![4, 5, 6], 9);
        assert_eq!(expert.query(), Some(OdQuery::new(4, 6, 9)));

        let empty = ExpertTrajectory::new(vec![], 0);
        assert_eq!(empty.query(), None);
    }
}
