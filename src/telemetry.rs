//! Coordinate math for the local planar frame and the `Telemetry` fusion
//! layer that turns raw sensor readings into a pose estimate.
use std::f64::consts::PI;
use std::sync::OnceLock;
use std::time::Instant;

use crate::estimated_compass::EstimatedCompass;
use crate::heading_filter::HeadingFilter;
use crate::location_filter::{LocationFilter, MAX_SPEED_M_S};
use crate::telemetry_message::TelemetryReading;

pub type Degrees = f64;
pub type Meters = f64;
pub type MetersPerSecond = f64;

/// The Earth modeled as a sphere.
pub const EARTH_RADIUS_M: Meters = 6_371_000.0;

/// Meters per degree of latitude, treated as a constant everywhere.
pub const M_PER_D_LATITUDE: Meters = EARTH_RADIUS_M * 2.0 * PI / 360.0;

// All conversions to the planar frame are relative to this reference point,
// the starting line at Sparkfun HQ.
pub const CENTRAL_LATITUDE: Degrees = 40.090_583;
pub const CENTRAL_LONGITUDE: Degrees = -105.185_664;

/// Turn rate of the car at full steering lock, used to convert steering
/// percentages into heading rates.
const FULL_STEERING_TURN_RATE_D_S: Degrees = 90.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: Meters,
    pub y: Meters,
}

/// A snapshot of the best pose estimate.
#[derive(Clone, Copy, Debug)]
pub struct TelemetryState {
    pub x_m: Meters,
    pub y_m: Meters,
    pub heading_d: Degrees,
    pub speed_m_s: MetersPerSecond,
}

/**
 * Wraps degrees to the canonical range (-180, 180].
 */
pub fn wrap_degrees(degrees: Degrees) -> Degrees {
    let mut wrapped = degrees % 360.0;
    if wrapped <= -180.0 {
        wrapped += 360.0;
    } else if wrapped > 180.0 {
        wrapped -= 360.0;
    }
    wrapped
}

/**
 * Calculates the absolute difference in degrees between two headings, using
 * the minimum arc between them.
 */
pub fn difference_d(heading_1_d: Degrees, heading_2_d: Degrees) -> Degrees {
    wrap_degrees(heading_1_d - heading_2_d).abs()
}

/**
 * Computes the bearing in degrees from the first point to the second, where
 * north (+y) is 0 and east is 90.
 */
pub fn relative_degrees(x_1: Meters, y_1: Meters, x_2: Meters, y_2: Meters) -> Degrees {
    let relative_x_m = x_2 - x_1;
    let relative_y_m = y_2 - y_1;
    wrap_degrees(relative_x_m.atan2(relative_y_m).to_degrees())
}

/**
 * Rotates a point a number of degrees clockwise around the origin.
 */
pub fn rotate_degrees_clockwise(point: Point, degrees: Degrees) -> Point {
    rotate_radians_clockwise(point, degrees.to_radians())
}

/**
 * Rotates a point a number of radians clockwise around the origin.
 */
pub fn rotate_radians_clockwise(point: Point, radians: f64) -> Point {
    let sine = radians.sin();
    let cosine = radians.cos();
    Point {
        x: point.x * cosine + point.y * sine,
        y: -point.x * sine + point.y * cosine,
    }
}

/**
 * Returns the distance in meters between two points in the planar frame.
 */
pub fn distance(point_1: &Point, point_2: &Point) -> Meters {
    ((point_1.x - point_2.x).powi(2) + (point_1.y - point_2.y).powi(2)).sqrt()
}

/**
 * Returns the number of meters per degree of longitude at a given latitude.
 */
pub fn latitude_d_to_m_per_longitude_d(latitude_d: Degrees) -> Meters {
    let radius_m = latitude_d.to_radians().cos() * EARTH_RADIUS_M;
    let circumference_m = 2.0 * PI * radius_m;
    circumference_m / 360.0
}

fn m_per_d_longitude() -> Meters {
    static CACHED: OnceLock<f64> = OnceLock::new();
    *CACHED.get_or_init(|| latitude_d_to_m_per_longitude_d(CENTRAL_LATITUDE))
}

/**
 * Returns the meters east of the reference point for a longitude.
 */
pub fn longitude_to_m_offset(longitude_d: Degrees) -> Meters {
    (longitude_d - CENTRAL_LONGITUDE) * m_per_d_longitude()
}

/**
 * Returns the meters north of the reference point for a latitude.
 */
pub fn latitude_to_m_offset(latitude_d: Degrees) -> Meters {
    (latitude_d - CENTRAL_LATITUDE) * M_PER_D_LATITUDE
}

/**
 * Inverse of `longitude_to_m_offset`, used when reporting positions back out
 * of the planar frame.
 */
pub fn m_offset_to_longitude(x_m: Meters) -> Degrees {
    CENTRAL_LONGITUDE + x_m / m_per_d_longitude()
}

/**
 * Inverse of `latitude_to_m_offset`.
 */
pub fn m_offset_to_latitude(y_m: Meters) -> Degrees {
    CENTRAL_LATITUDE + y_m / M_PER_D_LATITUDE
}

/**
 * Converts a latitude/longitude pair to a point in the planar frame.
 */
pub fn latitude_longitude_to_point(latitude_d: Degrees, longitude_d: Degrees) -> Point {
    Point {
        x: longitude_to_m_offset(longitude_d),
        y: latitude_to_m_offset(latitude_d),
    }
}

/**
 * Fuses raw sensor readings into filtered telemetry data. Readings and drive
 * commands may arrive from different threads in any order; callers serialize
 * access with a mutex and hold it for one update or one snapshot at a time.
 */
pub struct Telemetry {
    location_filter: LocationFilter,
    heading_filter: HeadingFilter,
    estimated_compass: EstimatedCompass,
    last_acceleration_g: (f32, f32, f32),
    started: Instant,
    last_observation_s: f64,
}

impl Telemetry {
    pub fn new(start: Point, heading_d: Degrees) -> Telemetry {
        Telemetry {
            location_filter: LocationFilter::new(start.x, start.y, heading_d),
            heading_filter: HeadingFilter::new(heading_d),
            estimated_compass: EstimatedCompass::new(),
            last_acceleration_g: (0.0, 0.0, -1.0),
            started: Instant::now(),
            last_observation_s: 0.0,
        }
    }

    /**
     * Returns the filtered pose estimate.
     */
    pub fn get_data(&self) -> TelemetryState {
        let (x_m, y_m) = self.location_filter.estimated_location();
        TelemetryState {
            x_m,
            y_m,
            heading_d: self.heading_filter.estimated_heading(),
            speed_m_s: self.location_filter.estimated_speed(),
        }
    }

    /**
     * Returns the most recent raw accelerometer reading in g.
     */
    pub fn acceleration_g(&self) -> (f32, f32, f32) {
        self.last_acceleration_g
    }

    /**
     * Processes a single canonical reading from the telemetry exchange.
     */
    pub fn handle_message(&mut self, reading: &TelemetryReading) {
        let now_s = self.now_s();
        let time_diff_s = now_s - self.last_observation_s;
        self.last_observation_s = now_s;

        match reading {
            TelemetryReading::Gps(gps) => {
                let point = latitude_longitude_to_point(gps.latitude_d, gps.longitude_d);
                self.location_filter.update_gps(
                    point.x,
                    point.y,
                    gps.accuracy_m,
                    gps.accuracy_m,
                    gps.heading_d,
                    gps.speed_m_s,
                    time_diff_s,
                );
                if let Some(heading_d) = gps.heading_d {
                    self.heading_filter.update_heading(heading_d);
                }
            }
            TelemetryReading::Compass(compass) => {
                let heading_d = self
                    .estimated_compass
                    .get_estimated_heading(compass.compass_d, now_s);
                self.location_filter
                    .update_compass(heading_d, compass.confidence, time_diff_s);
                self.heading_filter.update_heading(heading_d);
            }
            TelemetryReading::Accelerometer(acceleration) => {
                self.last_acceleration_g = (
                    acceleration.acceleration_g_x,
                    acceleration.acceleration_g_y,
                    acceleration.acceleration_g_z,
                );
            }
        }
    }

    /**
     * Runs the dead reckoning prediction when no reading has arrived.
     */
    pub fn update_dead_reckoning(&mut self) {
        let now_s = self.now_s();
        let time_diff_s = now_s - self.last_observation_s;
        self.last_observation_s = now_s;
        self.location_filter.update_dead_reckoning(time_diff_s);
    }

    /**
     * Integrates a commanded throttle and steering into the estimates. The
     * GPS and compass lag the actual movement, so the commands are the
     * earliest signal we have.
     */
    pub fn process_drive_command(&mut self, throttle: f32, steering: f32) {
        if !(-1.0..=1.0).contains(&throttle) {
            warn!("Invalid throttle: {}", throttle);
            return;
        }
        if !(-1.0..=1.0).contains(&steering) {
            warn!("Invalid steering: {}", steering);
            return;
        }

        let now_s = self.now_s();
        let time_diff_s = now_s - self.last_observation_s;
        self.last_observation_s = now_s;

        let turn_rate_d_s = f64::from(steering) * FULL_STEERING_TURN_RATE_D_S;
        self.location_filter
            .manual_throttle(f64::from(throttle) * MAX_SPEED_M_S, time_diff_s);
        self.location_filter.manual_steering(turn_rate_d_s);
        self.heading_filter
            .update_heading_delta(turn_rate_d_s, time_diff_s);
        self.estimated_compass.process_drive_command(
            steering,
            self.heading_filter.estimated_heading(),
            now_s,
        );
    }

    fn now_s(&self) -> f64 {
        let elapsed = self.started.elapsed();
        elapsed.as_secs() as f64 + f64::from(elapsed.subsec_nanos()) * 1e-9
    }
}
