//! The simplest waypoint strategy: head straight for each waypoint in turn.
use crate::telemetry::{distance, Meters, Point};
use crate::waypoint_generator::{Result, WaypointError, WaypointGenerator};

/// A waypoint counts as reached inside this distance.
const REACHED_M: Meters = 1.0;

/// Inside this distance, a growing distance also counts as reached.
const OVERSHOOT_M: Meters = 3.0;

pub struct SimpleWaypointGenerator {
    waypoints: Vec<Point>,
    initial_waypoints: Vec<Point>,
    current_waypoint_index: usize,
    last_distance_m: Meters,
}

impl SimpleWaypointGenerator {
    pub fn new(waypoints: Vec<Point>) -> SimpleWaypointGenerator {
        info!("Loaded {} waypoints", waypoints.len());
        SimpleWaypointGenerator {
            initial_waypoints: waypoints.clone(),
            waypoints,
            current_waypoint_index: 0,
            last_distance_m: std::f64::INFINITY,
        }
    }

    pub(crate) fn waypoints(&self) -> &[Point] {
        &self.waypoints
    }

    pub(crate) fn current_waypoint_index(&self) -> usize {
        self.current_waypoint_index
    }
}

impl WaypointGenerator for SimpleWaypointGenerator {
    fn get_current_waypoint(&self, _x_m: Meters, _y_m: Meters) -> Result<Point> {
        if self.current_waypoint_index < self.waypoints.len() {
            Ok(self.waypoints[self.current_waypoint_index])
        } else {
            Err(WaypointError::NoWaypointsLeft)
        }
    }

    fn get_raw_waypoint(&self) -> Point {
        if self.current_waypoint_index < self.waypoints.len() {
            self.waypoints[self.current_waypoint_index]
        } else {
            // Dummy data for the monitor
            Point { x: 0.0, y: 0.0 }
        }
    }

    fn reached(&mut self, x_m: Meters, y_m: Meters) -> bool {
        // The car was driving in circles hunting for a hard 1.5 m cutoff, so
        // count the waypoint as reached when the distance gets small, or when
        // it got close and starts increasing again
        let waypoint = match self.get_current_waypoint(x_m, y_m) {
            Ok(waypoint) => waypoint,
            Err(_) => return false,
        };
        let distance_m = distance(&Point { x: x_m, y: y_m }, &waypoint);
        if distance_m < REACHED_M {
            self.last_distance_m = std::f64::INFINITY;
            return true;
        }
        if self.last_distance_m < OVERSHOOT_M && distance_m > self.last_distance_m {
            self.last_distance_m = std::f64::INFINITY;
            return true;
        }

        self.last_distance_m = distance_m;
        false
    }

    fn next(&mut self) {
        self.current_waypoint_index += 1;
        self.last_distance_m = std::f64::INFINITY;
    }

    fn done(&self) -> bool {
        self.current_waypoint_index >= self.waypoints.len()
    }

    fn reset(&mut self) {
        self.waypoints = self.initial_waypoints.clone();
        self.current_waypoint_index = 0;
        self.last_distance_m = std::f64::INFINITY;
    }

    fn set_waypoints(&mut self, waypoints: Vec<Point>) {
        self.initial_waypoints = waypoints.clone();
        self.waypoints = waypoints;
        self.current_waypoint_index = 0;
        self.last_distance_m = std::f64::INFINITY;
    }
}
