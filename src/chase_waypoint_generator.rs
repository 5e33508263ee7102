//! Waypoint strategy that implements the "rabbit chase" pure-pursuit
//! algorithm: aim for the point on the path a fixed look-ahead distance
//! away, rather than the waypoint itself.
use crate::telemetry::{distance, Meters, Point};
use crate::waypoint_generator::{Result, WaypointError, WaypointGenerator};

/// Look-ahead distance to the chase point.
const CHASE_DISTANCE_M: Meters = 15.0;

/// A waypoint counts as reached inside this distance.
const REACHED_M: Meters = 1.5;

pub struct ChaseWaypointGenerator {
    waypoints: Vec<Point>,
    initial_waypoints: Vec<Point>,
    current_waypoint_index: usize,
    distance_m: Meters,
}

impl ChaseWaypointGenerator {
    pub fn new(waypoints: Vec<Point>) -> ChaseWaypointGenerator {
        ChaseWaypointGenerator::new_with_distance(waypoints, CHASE_DISTANCE_M)
    }

    pub fn new_with_distance(waypoints: Vec<Point>, distance_m: Meters) -> ChaseWaypointGenerator {
        info!("Loaded {} waypoints", waypoints.len());
        ChaseWaypointGenerator {
            initial_waypoints: waypoints.clone(),
            waypoints,
            current_waypoint_index: 0,
            distance_m,
        }
    }

    /**
     * Returns the points of intersection between a line through two points
     * and a circle, if any. A tangent line returns a single point.
     */
    fn circle_intersections(
        point_1: Point,
        point_2: Point,
        circle_center: Point,
        circle_radius: Meters,
    ) -> Vec<Point> {
        // Translate the segment so the circle sits at the origin
        let x_1 = point_1.x - circle_center.x;
        let x_2 = point_2.x - circle_center.x;
        let y_1 = point_1.y - circle_center.y;
        let y_2 = point_2.y - circle_center.y;
        let d_x = x_2 - x_1;
        let d_y = y_2 - y_1;
        let d_r_2 = d_x * d_x + d_y * d_y;
        let determinant = x_1 * y_2 - x_2 * y_1;

        let discriminant = circle_radius * circle_radius * d_r_2 - determinant * determinant;
        if discriminant < 0.0 || d_r_2 == 0.0 {
            return Vec::new();
        }

        // The sign factor keeps the x and y roots paired on the line when
        // the segment descends
        let sign = if d_y < 0.0 { -1.0 } else { 1.0 };
        let root = discriminant.sqrt();
        let intersection_1 = Point {
            x: (determinant * d_y + sign * d_x * root) / d_r_2 + circle_center.x,
            y: (-determinant * d_x + d_y.abs() * root) / d_r_2 + circle_center.y,
        };
        let intersection_2 = Point {
            x: (determinant * d_y - sign * d_x * root) / d_r_2 + circle_center.x,
            y: (-determinant * d_x - d_y.abs() * root) / d_r_2 + circle_center.y,
        };

        // Degenerate case of a tangent line
        if intersection_1 == intersection_2 {
            return vec![intersection_1];
        }
        vec![intersection_1, intersection_2]
    }

    /**
     * Returns the perpendicular distance from a point to the line through
     * two other points, or None for a degenerate line.
     */
    fn tangent_distance_m(point: Point, line_point_1: Point, line_point_2: Point) -> Option<Meters> {
        let denominator = distance(&line_point_1, &line_point_2);
        if denominator == 0.0 {
            // The line's points are on top of each other
            return None;
        }
        Some(
            ((line_point_2.y - line_point_1.y) * point.x
                - (line_point_2.x - line_point_1.x) * point.y
                + line_point_2.x * line_point_1.y
                - line_point_2.y * line_point_1.x)
                .abs()
                / denominator,
        )
    }

    fn chase_waypoint(&self, car: Point) -> Point {
        let current = self.waypoints[self.current_waypoint_index];
        let previous = self.waypoints[self.current_waypoint_index - 1];

        let mut intersections =
            ChaseWaypointGenerator::circle_intersections(previous, current, car, self.distance_m);
        if intersections.is_empty() {
            // Well, this is bad. I guess we could go for a tangent?
            warn!(
                "No chase waypoint in range: {} from ({:.3}, {:.3})-({:.3}, {:.3}), using tangent",
                self.distance_m, previous.x, previous.y, current.x, current.y,
            );
            let tangent_m = match ChaseWaypointGenerator::tangent_distance_m(car, previous, current)
            {
                Some(tangent_m) => tangent_m,
                None => {
                    warn!("Unable to compute tangent, falling back to waypoint");
                    return current;
                }
            };
            intersections = ChaseWaypointGenerator::circle_intersections(
                previous,
                current,
                car,
                // Avoid floating point issues
                tangent_m + 0.1,
            );
            if intersections.is_empty() {
                return current;
            }
        }

        intersections
            .into_iter()
            .min_by(|intersection_1, intersection_2| {
                let distance_1 = distance(intersection_1, &current);
                let distance_2 = distance(intersection_2, &current);
                distance_1.partial_cmp(&distance_2).expect("NaN distance")
            })
            .expect("No intersections after fallback")
    }
}

impl WaypointGenerator for ChaseWaypointGenerator {
    fn get_current_waypoint(&self, x_m: Meters, y_m: Meters) -> Result<Point> {
        if self.done() {
            return Err(WaypointError::NoWaypointsLeft);
        }
        let current = self.waypoints[self.current_waypoint_index];
        if self.current_waypoint_index == 0 || self.waypoints.len() == 1 {
            return Ok(current);
        }

        let car = Point { x: x_m, y: y_m };
        if distance(&current, &car) < self.distance_m {
            return Ok(current);
        }
        Ok(self.chase_waypoint(car))
    }

    fn get_raw_waypoint(&self) -> Point {
        if self.current_waypoint_index < self.waypoints.len() {
            self.waypoints[self.current_waypoint_index]
        } else {
            Point { x: 0.0, y: 0.0 }
        }
    }

    fn reached(&mut self, x_m: Meters, y_m: Meters) -> bool {
        if self.done() {
            return false;
        }
        let waypoint = self.waypoints[self.current_waypoint_index];
        distance(&Point { x: x_m, y: y_m }, &waypoint) < REACHED_M
    }

    fn next(&mut self) {
        self.current_waypoint_index += 1;
    }

    fn done(&self) -> bool {
        self.current_waypoint_index >= self.waypoints.len()
    }

    fn reset(&mut self) {
        self.waypoints = self.initial_waypoints.clone();
        self.current_waypoint_index = 0;
    }

    fn set_waypoints(&mut self, waypoints: Vec<Point>) {
        self.initial_waypoints = waypoints.clone();
        self.waypoints = waypoints;
        self.current_waypoint_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::ChaseWaypointGenerator;
    use crate::telemetry::{distance, Point};
    use crate::waypoint_generator::{WaypointError, WaypointGenerator};

    fn assert_contains_approx(intersections: &[Point], expected: Point) {
        assert!(
            intersections
                .iter()
                .any(|point| distance(point, &expected) < 0.00001),
            "{:?} does not contain {:?}",
            intersections,
            expected
        );
    }

    #[test]
    fn test_circle_intersections_horizontal_segment() {
        let intersections = ChaseWaypointGenerator::circle_intersections(
            Point { x: -3.0, y: 0.0 },
            Point { x: 300.0, y: 0.0 },
            Point { x: 0.0, y: 0.0 },
            2.0,
        );
        assert_eq!(intersections.len(), 2);
        assert_contains_approx(&intersections, Point { x: 2.0, y: 0.0 });
        assert_contains_approx(&intersections, Point { x: -2.0, y: 0.0 });
    }

    #[test]
    fn test_circle_intersections_vertical_segment() {
        let intersections = ChaseWaypointGenerator::circle_intersections(
            Point { x: 1.0, y: -10.0 },
            Point { x: 1.0, y: 10.0 },
            Point { x: 1.0, y: 0.0 },
            3.0,
        );
        assert_eq!(intersections.len(), 2);
        assert_contains_approx(&intersections, Point { x: 1.0, y: 3.0 });
        assert_contains_approx(&intersections, Point { x: 1.0, y: -3.0 });
    }

    #[test]
    fn test_circle_intersections_descending_segment() {
        // A segment descending through the circle; the root pairing must
        // stay on the line
        let intersections = ChaseWaypointGenerator::circle_intersections(
            Point { x: -10.0, y: 10.0 },
            Point { x: 10.0, y: -10.0 },
            Point { x: 0.0, y: 0.0 },
            2.0,
        );
        assert_eq!(intersections.len(), 2);
        let on_line = 2.0f64.sqrt();
        assert_contains_approx(
            &intersections,
            Point {
                x: on_line,
                y: -on_line,
            },
        );
        assert_contains_approx(
            &intersections,
            Point {
                x: -on_line,
                y: on_line,
            },
        );
    }

    #[test]
    fn test_circle_intersections_none() {
        let intersections = ChaseWaypointGenerator::circle_intersections(
            Point { x: -5.0, y: 0.0 },
            Point { x: 5.0, y: 0.0 },
            Point { x: 0.0, y: -10.0 },
            9.0,
        );
        assert_eq!(intersections.len(), 0);
    }

    #[test]
    fn test_circle_intersections_tangent() {
        // The line y = 2 just touches a circle of radius 2 at the origin
        let intersections = ChaseWaypointGenerator::circle_intersections(
            Point { x: -10.0, y: 2.0 },
            Point { x: 10.0, y: 2.0 },
            Point { x: 0.0, y: 0.0 },
            2.0,
        );
        assert_eq!(intersections.len(), 1);
        assert_contains_approx(&intersections, Point { x: 0.0, y: 2.0 });
    }

    #[test]
    fn test_tangent_distance_m() {
        let tangent = ChaseWaypointGenerator::tangent_distance_m(
            Point { x: 0.0, y: 5.0 },
            Point { x: -10.0, y: 0.0 },
            Point { x: 10.0, y: 0.0 },
        )
        .unwrap();
        assert!((tangent - 5.0).abs() < 0.00001);

        assert!(ChaseWaypointGenerator::tangent_distance_m(
            Point { x: 0.0, y: 5.0 },
            Point { x: 1.0, y: 1.0 },
            Point { x: 1.0, y: 1.0 },
        )
        .is_none());
    }

    #[test]
    fn test_get_current_waypoint_on_straight_line() {
        let mut generator = ChaseWaypointGenerator::new(vec![
            Point { x: 0.0, y: 0.0 },
            Point { x: 0.0, y: 1.0 },
            Point { x: 0.0, y: 2.0 },
            Point { x: 0.0, y: 3.0 },
        ]);
        generator.next();
        generator.next();
        // Car just off the path; the target should be on the segment and
        // ahead of the car
        let target = generator.get_current_waypoint(-1.0, 0.5).unwrap();
        assert!((target.x - 0.0).abs() < 0.00001);
        assert!(target.y > 0.5);
    }

    #[test]
    fn test_get_current_waypoint_at_waypoint() {
        let mut generator = ChaseWaypointGenerator::new(vec![
            Point { x: 0.0, y: 0.0 },
            Point { x: 10.0, y: 10.0 },
        ]);
        generator.next();
        // Sitting right on the waypoint returns the waypoint
        let target = generator.get_current_waypoint(10.0, 10.0).unwrap();
        assert_eq!(target, Point { x: 10.0, y: 10.0 });
    }

    #[test]
    fn test_get_current_waypoint_far_from_segment_uses_tangent() {
        let mut generator = ChaseWaypointGenerator::new_with_distance(
            vec![
                Point { x: 0.0, y: 100.0 },
                Point { x: 10.0, y: 100.0 },
            ],
            2.0,
        );
        generator.next();
        // The car is 100 m from the segment, far beyond the chase circle;
        // the tangent retry still produces a target on the line
        let target = generator.get_current_waypoint(5.0, 0.0).unwrap();
        assert!((target.y - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_get_current_waypoint_degenerate_segment() {
        let mut generator = ChaseWaypointGenerator::new(vec![
            Point { x: 50.0, y: 50.0 },
            Point { x: 50.0, y: 50.0 },
        ]);
        generator.next();
        let target = generator.get_current_waypoint(0.0, 0.0).unwrap();
        assert_eq!(target, Point { x: 50.0, y: 50.0 });
    }

    #[test]
    fn test_first_waypoint_returned_directly() {
        let generator = ChaseWaypointGenerator::new(vec![
            Point { x: 30.0, y: 40.0 },
            Point { x: 100.0, y: 100.0 },
        ]);
        let target = generator.get_current_waypoint(0.0, 0.0).unwrap();
        assert_eq!(target, Point { x: 30.0, y: 40.0 });
    }

    #[test]
    fn test_reached() {
        let mut generator = ChaseWaypointGenerator::new(vec![Point { x: 0.0, y: 0.0 }]);
        assert!(generator.reached(0.0, 1.0));
        assert!(generator.reached(1.0, 1.0));
        assert!(!generator.reached(0.0, 1.5));
        assert!(!generator.reached(5.0, 5.0));
    }

    #[test]
    fn test_done_and_reset() {
        let mut generator = ChaseWaypointGenerator::new(vec![
            Point { x: 0.0, y: 0.0 },
            Point { x: 1.0, y: 1.0 },
        ]);
        assert!(!generator.done());
        generator.next();
        generator.next();
        assert!(generator.done());
        assert_eq!(
            generator.get_current_waypoint(0.0, 0.0),
            Err(WaypointError::NoWaypointsLeft)
        );
        assert_eq!(generator.get_raw_waypoint(), Point { x: 0.0, y: 0.0 });
        generator.reset();
        assert!(!generator.done());
    }
}
