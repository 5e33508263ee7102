//! Waypoint strategy that aims for a point extended beyond the actual
//! waypoint, along the incoming segment. Chasing the extension keeps the
//! steering from oscillating as the car closes in on the real waypoint.
use crate::simple_waypoint_generator::SimpleWaypointGenerator;
use crate::telemetry::{
    distance, relative_degrees, rotate_degrees_clockwise, Meters, Point,
};
use crate::waypoint_generator::{Result, WaypointGenerator};

/// How far past the waypoint the target is projected.
const BEYOND_M: Meters = 5.0;

pub struct ExtensionWaypointGenerator {
    inner: SimpleWaypointGenerator,
    extension_waypoint: Point,
}

impl ExtensionWaypointGenerator {
    pub fn new(waypoints: Vec<Point>) -> ExtensionWaypointGenerator {
        let inner = SimpleWaypointGenerator::new(waypoints);
        let mut generator = ExtensionWaypointGenerator {
            inner,
            extension_waypoint: Point { x: 0.0, y: 0.0 },
        };
        generator.extension_waypoint = generator.compute_extension();
        generator
    }

    /**
     * Projects the current waypoint BEYOND_M past itself, along the segment
     * from the previous waypoint. The first and last waypoints are their own
     * extensions.
     */
    fn compute_extension(&self) -> Point {
        let waypoints = self.inner.waypoints();
        let index = self.inner.current_waypoint_index();
        if waypoints.is_empty() || index >= waypoints.len() {
            return Point { x: 0.0, y: 0.0 };
        }
        if index == 0 || index == waypoints.len() - 1 {
            return waypoints[index];
        }

        let previous = waypoints[index - 1];
        let current = waypoints[index];
        let degrees = relative_degrees(previous.x, previous.y, current.x, current.y);
        let offset = rotate_degrees_clockwise(Point { x: 0.0, y: BEYOND_M }, degrees);
        Point {
            x: current.x + offset.x,
            y: current.y + offset.y,
        }
    }
}

impl WaypointGenerator for ExtensionWaypointGenerator {
    fn get_current_waypoint(&self, x_m: Meters, y_m: Meters) -> Result<Point> {
        // Fail the same way the plain strategy would when exhausted
        self.inner.get_current_waypoint(x_m, y_m)?;
        Ok(self.extension_waypoint)
    }

    fn get_raw_waypoint(&self) -> Point {
        self.inner.get_raw_waypoint()
    }

    fn reached(&mut self, x_m: Meters, y_m: Meters) -> bool {
        if self.inner.reached(x_m, y_m) {
            return true;
        }
        // The car aims for the extension, so it might sail past the actual
        // waypoint and keep driving; getting close to the extension counts
        distance(&Point { x: x_m, y: y_m }, &self.extension_waypoint) < BEYOND_M
    }

    fn next(&mut self) {
        self.inner.next();
        self.extension_waypoint = self.compute_extension();
    }

    fn done(&self) -> bool {
        self.inner.done()
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.extension_waypoint = self.compute_extension();
    }

    fn set_waypoints(&mut self, waypoints: Vec<Point>) {
        self.inner.set_waypoints(waypoints);
        self.extension_waypoint = self.compute_extension();
    }
}
