use thiserror::Error;

use roost_proto::frames::Waypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanState {
    #[default]
    Idle,
    Planning,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("path planning is not active")]
    NotPlanning,
    #[error("planned path is empty")]
    EmptyPath,
}

/// Candidate flight path accumulator.
///
/// `Idle -> Planning -> Idle`. The waypoint buffer survives a successful
/// dispatch so the operator can review it; it is discarded only by `start`,
/// `cancel`, or `clear`. On a failed dispatch the caller re-enters Planning
/// via `resume` so the path can be retried without redrawing.
#[derive(Debug, Default)]
pub struct PathPlanner {
    state: PlanState,
    waypoints: Vec<Waypoint>,
}

impl PathPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Drop any previous sequence and begin a fresh one.
    pub fn start(&mut self) {
        self.waypoints.clear();
        self.state = PlanState::Planning;
    }

    /// Append-only, and only while planning; silently ignored otherwise.
    pub fn add_waypoint(&mut self, point: Waypoint) {
        if self.state == PlanState::Planning {
            self.waypoints.push(point);
        }
    }

    pub fn cancel(&mut self) {
        self.waypoints.clear();
        self.state = PlanState::Idle;
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
    }

    /// Leave Planning and hand the ordered sequence to the dispatcher. An
    /// empty sequence fails without sending anything and still lands in Idle.
    pub fn finalize(&mut self) -> Result<Vec<Waypoint>, PlanError> {
        if self.state != PlanState::Planning {
            return Err(PlanError::NotPlanning);
        }
        self.state = PlanState::Idle;
        if self.waypoints.is_empty() {
            return Err(PlanError::EmptyPath);
        }
        Ok(self.waypoints.clone())
    }

    /// Re-enter Planning with the buffer intact after a failed dispatch.
    pub fn resume(&mut self) {
        self.state = PlanState::Planning;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(lat: f64, lng: f64) -> Waypoint {
        Waypoint { lat, lng, height: 10.0, heading: 0.0 }
    }

    #[test]
    fn waypoints_accumulate_only_while_planning() {
        let mut planner = PathPlanner::new();
        planner.add_waypoint(wp(1.0, 2.0));
        assert!(planner.waypoints().is_empty());

        planner.start();
        planner.add_waypoint(wp(1.0, 2.0));
        planner.add_waypoint(wp(3.0, 4.0));
        assert_eq!(planner.waypoints().len(), 2);

        planner.cancel();
        assert!(planner.waypoints().is_empty());
        assert_eq!(planner.state(), PlanState::Idle);
    }

    #[test]
    fn finalize_empty_path_fails_and_lands_idle() {
        let mut planner = PathPlanner::new();
        planner.start();
        assert_eq!(planner.finalize(), Err(PlanError::EmptyPath));
        assert_eq!(planner.state(), PlanState::Idle);
    }

    #[test]
    fn finalize_outside_planning_is_rejected() {
        let mut planner = PathPlanner::new();
        assert_eq!(planner.finalize(), Err(PlanError::NotPlanning));
    }

    #[test]
    fn buffer_retained_after_finalize() {
        let mut planner = PathPlanner::new();
        planner.start();
        planner.add_waypoint(wp(1.0, 2.0));
        let path = planner.finalize().unwrap();
        assert_eq!(path.len(), 1);
        // Retained for review until the next start() or clear().
        assert_eq!(planner.waypoints().len(), 1);
        assert_eq!(planner.state(), PlanState::Idle);

        planner.start();
        assert!(planner.waypoints().is_empty());
    }

    #[test]
    fn resume_reenters_planning_with_buffer() {
        let mut planner = PathPlanner::new();
        planner.start();
        planner.add_waypoint(wp(1.0, 2.0));
        let _ = planner.finalize().unwrap();

        planner.resume();
        assert_eq!(planner.state(), PlanState::Planning);
        assert_eq!(planner.waypoints().len(), 1);
        planner.add_waypoint(wp(3.0, 4.0));
        assert_eq!(planner.finalize().unwrap().len(), 2);
    }
}
