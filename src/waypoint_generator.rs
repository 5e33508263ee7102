//! The contract shared by the waypoint strategies. Implementations are free
//! to return a computed target rather than the literal waypoint, which is
//! how the chase and extension algorithms work.
use std::fmt;
use std::{error, result};

use crate::telemetry::{Meters, Point};

pub type Result<T> = result::Result<T, WaypointError>;

#[derive(Debug, PartialEq)]
pub enum WaypointError {
    /// Every waypoint has been consumed.
    NoWaypointsLeft,
}

impl fmt::Display for WaypointError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WaypointError::NoWaypointsLeft => write!(formatter, "No waypoints left"),
        }
    }
}

impl error::Error for WaypointError {}

/**
 * Provides waypoint data.
 */
pub trait WaypointGenerator: Send {
    /**
     * Returns the point the car should steer toward right now. We take in
     * the current position so that implementations can do fancy algorithms,
     * like chase algorithms.
     */
    fn get_current_waypoint(&self, x_m: Meters, y_m: Meters) -> Result<Point>;

    /**
     * Returns the underlying raw waypoint. Should only be used by monitors;
     * returns a dummy point when the course is done.
     */
    fn get_raw_waypoint(&self) -> Point;

    /**
     * Returns true if the current waypoint has been reached.
     */
    fn reached(&mut self, x_m: Meters, y_m: Meters) -> bool;

    /**
     * Moves to the next waypoint.
     */
    fn next(&mut self);

    /**
     * Returns true if the course is done and there are no remaining
     * waypoints.
     */
    fn done(&self) -> bool;

    /**
     * Restores the initial waypoint sequence and rewinds to the start.
     */
    fn reset(&mut self);

    /**
     * Atomically replaces the waypoint sequence and rewinds to the start.
     */
    fn set_waypoints(&mut self, waypoints: Vec<Point>);
}
