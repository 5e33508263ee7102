//! Kalman filter for the location of the vehicle.
use crate::telemetry::{
    rotate_radians_clockwise, wrap_degrees, Degrees, Meters, MetersPerSecond, Point,
};

/// 11 MPH, the top speed observed on flat ground.
pub const MAX_SPEED_M_S: MetersPerSecond = 11.0 * 5280.0 / 60.0 / 60.0 / 3.2808399;

type Matrix44 = [[f64; 4]; 4];
type Vector4 = [f64; 4];

// Values used to fill in the diagonal of the measurement noise matrices.
// These degrees and speed values are guesses; the compass one is kept
// artificially high because of local magnetic interference observed while
// driving around.
const GPS_HEADING_NOISE_D: f64 = 5.0;
const COMPASS_BASE_NOISE_D: f64 = 45.0;
const SPEED_ESTIMATION_NOISE_M_S: f64 = 2.0;

pub struct LocationFilter {
    // x m, y m, heading d, speed m/s
    estimates: Vector4,       // x
    covariance: Matrix44,     // P
    process_noise: Matrix44,  // Q
    estimated_turn_rate_d_s: f64,
}

impl LocationFilter {
    pub fn new(x_m: Meters, y_m: Meters, heading_d: Degrees) -> LocationFilter {
        LocationFilter {
            estimates: [x_m, y_m, wrap_degrees(heading_d), 0.0],
            // This will be refined as the filter runs
            covariance: identity(),
            process_noise: identity(),
            estimated_turn_rate_d_s: 0.0,
        }
    }

    /**
     * Updates the state estimation using a GPS fix. Heading and speed may be
     * missing from a reading; the corresponding observer rows are zeroed so
     * the update ignores them.
     */
    pub fn update_gps(
        &mut self,
        x_m: Meters,
        y_m: Meters,
        x_accuracy_m: Meters,
        y_accuracy_m: Meters,
        heading_d: Option<Degrees>,
        speed_m_s: Option<MetersPerSecond>,
        time_diff_s: f64,
    ) {
        let mut observer_matrix = identity();
        if heading_d.is_none() {
            observer_matrix[2][2] = 0.0;
        }
        if speed_m_s.is_none() {
            observer_matrix[3][3] = 0.0;
        }

        let mut measurement_noise = [[0.0f64; 4]; 4];
        measurement_noise[0][0] = x_accuracy_m;
        measurement_noise[1][1] = y_accuracy_m;
        measurement_noise[2][2] = GPS_HEADING_NOISE_D;
        measurement_noise[3][3] = MAX_SPEED_M_S * 0.1;

        let measurements = [
            x_m,
            y_m,
            heading_d.unwrap_or(0.0),
            speed_m_s.unwrap_or(0.0),
        ];
        self.update(&measurements, &observer_matrix, &measurement_noise, time_diff_s);
    }

    /**
     * Updates the heading estimation using a compass reading with a
     * confidence in [0, 1].
     */
    pub fn update_compass(&mut self, compass_d: Degrees, confidence: f64, time_diff_s: f64) {
        let mut observer_matrix = [[0.0f64; 4]; 4];
        observer_matrix[2][2] = 1.0;

        let mut measurement_noise = [[0.0f64; 4]; 4];
        measurement_noise[2][2] = COMPASS_BASE_NOISE_D + COMPASS_BASE_NOISE_D * (1.0 - confidence);

        let measurements = [0.0, 0.0, compass_d, 0.0];
        self.update(&measurements, &observer_matrix, &measurement_noise, time_diff_s);
    }

    /**
     * Updates the dead reckoning position estimate.
     */
    pub fn update_dead_reckoning(&mut self, time_diff_s: f64) {
        self.prediction_step(time_diff_s);
    }

    /**
     * Updates the estimated speed based on throttle input.
     */
    pub fn manual_throttle(&mut self, speed_m_s: MetersPerSecond, time_diff_s: f64) {
        let mut observer_matrix = [[0.0f64; 4]; 4];
        observer_matrix[3][3] = 1.0;

        let mut measurement_noise = [[0.0f64; 4]; 4];
        measurement_noise[3][3] = SPEED_ESTIMATION_NOISE_M_S;

        let measurements = [0.0, 0.0, 0.0, speed_m_s];
        self.update(&measurements, &observer_matrix, &measurement_noise, time_diff_s);
    }

    /**
     * Updates the estimated turn rate based on steering input.
     */
    pub fn manual_steering(&mut self, turn_d_s: f64) {
        self.estimated_turn_rate_d_s = turn_d_s;
    }

    /**
     * Runs the Kalman update using the provided measurements.
     */
    fn update(
        &mut self,
        measurements: &Vector4,  // z
        observer_matrix: &Matrix44,  // H
        measurement_noise: &Matrix44,  // R
        time_diff_s: f64,
    ) {
        // Prediction step
        let transition = self.prediction_step(time_diff_s);

        // Update uncertainty
        // P = A * P * A' + Q
        self.covariance = add(
            &multiply(&multiply(&transition, &self.covariance), &transpose(&transition)),
            &self.process_noise,
        );

        // Compute the Kalman gain
        // K = P * H' * inv(H * P * H' + R)
        let observer_matrix_t = transpose(observer_matrix);
        let hphtr = add(
            &multiply(&multiply(observer_matrix, &self.covariance), &observer_matrix_t),
            measurement_noise,
        );
        let hphtr_inverse = invert(&hphtr);
        let kalman_gain = multiply(&multiply(&self.covariance, &observer_matrix_t), &hphtr_inverse);

        // Determine innovation or residual and update our estimate
        // x = x + K * (z - H * x)
        let mut zhx = subtract_vector(measurements, &multiply_vector(observer_matrix, &self.estimates));
        zhx[2] = wrap_degrees(zhx[2]);

        self.estimates = add_vector(&self.estimates, &multiply_vector(&kalman_gain, &zhx));
        self.estimates[2] = wrap_degrees(self.estimates[2]);

        // Update the covariance
        // P = (I - K * H) * P
        let ikh = subtract(&identity(), &multiply(&kalman_gain, observer_matrix));
        self.covariance = multiply(&ikh, &self.covariance);
    }

    /**
     * Runs the prediction step and returns the transition matrix.
     */
    fn prediction_step(&mut self, time_diff_s: f64) -> Matrix44 {
        // x = A * x
        let heading_r = self.estimated_heading().to_radians();
        let delta = rotate_radians_clockwise(
            Point {
                x: 0.0,
                y: time_diff_s,
            },
            heading_r,
        );
        let transition = [
            // A
            [1.0, 0.0, 0.0, delta.x],
            [0.0, 1.0, 0.0, delta.y],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];

        // Advance the heading estimate based on the commanded steering
        self.estimates[2] = wrap_degrees(
            self.estimates[2] + self.estimated_turn_rate_d_s * time_diff_s,
        );

        self.estimates = multiply_vector(&transition, &self.estimates);
        self.estimates[2] = wrap_degrees(self.estimates[2]);
        transition
    }

    /**
     * Returns the estimated true location in x and y meters.
     */
    pub fn estimated_location(&self) -> (Meters, Meters) {
        (self.estimates[0], self.estimates[1])
    }

    /**
     * Returns the estimated true heading in degrees.
     */
    pub fn estimated_heading(&self) -> Degrees {
        self.estimates[2]
    }

    /**
     * Returns the estimated speed in meters per second.
     */
    pub fn estimated_speed(&self) -> MetersPerSecond {
        self.estimates[3]
    }
}

fn identity() -> Matrix44 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

fn multiply(a: &Matrix44, b: &Matrix44) -> Matrix44 {
    let mut out = [[0.0f64; 4]; 4];
    for row in 0..4 {
        for column in 0..4 {
            let mut sum = 0.0;
            for iter in 0..4 {
                sum += a[row][iter] * b[iter][column];
            }
            out[row][column] = sum;
        }
    }
    out
}

fn multiply_vector(a: &Matrix44, v: &Vector4) -> Vector4 {
    let mut out = [0.0f64; 4];
    for row in 0..4 {
        let mut sum = 0.0;
        for iter in 0..4 {
            sum += a[row][iter] * v[iter];
        }
        out[row] = sum;
    }
    out
}

fn add(a: &Matrix44, b: &Matrix44) -> Matrix44 {
    let mut out = [[0.0f64; 4]; 4];
    for row in 0..4 {
        for column in 0..4 {
            out[row][column] = a[row][column] + b[row][column];
        }
    }
    out
}

fn subtract(a: &Matrix44, b: &Matrix44) -> Matrix44 {
    let mut out = [[0.0f64; 4]; 4];
    for row in 0..4 {
        for column in 0..4 {
            out[row][column] = a[row][column] - b[row][column];
        }
    }
    out
}

fn add_vector(a: &Vector4, b: &Vector4) -> Vector4 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
}

fn subtract_vector(a: &Vector4, b: &Vector4) -> Vector4 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]
}

fn transpose(a: &Matrix44) -> Matrix44 {
    let mut out = [[0.0f64; 4]; 4];
    for row in 0..4 {
        for column in 0..4 {
            out[row][column] = a[column][row];
        }
    }
    out
}

/**
 * Inverts a matrix. Observer matrices with zeroed rows produce singular
 * matrices, so zero diagonal entries are nudged and the inversion retried.
 */
fn invert(a: &Matrix44) -> Matrix44 {
    if let Some(out) = invert_raw(a) {
        return out;
    }
    let mut nudged = *a;
    for diagonal in 0..4 {
        if nudged[diagonal][diagonal] == 0.0 {
            nudged[diagonal][diagonal] = 0.00001;
        }
    }
    match invert_raw(&nudged) {
        Some(out) => out,
        None => {
            // Nothing sane left to do; skip this measurement
            error!("Unable to invert matrix, even after nudging: {:?}", nudged);
            identity()
        }
    }
}

fn invert_raw(a: &Matrix44) -> Option<Matrix44> {
    let s0 = a[0][0] * a[1][1] - a[1][0] * a[0][1];
    let s1 = a[0][0] * a[1][2] - a[1][0] * a[0][2];
    let s2 = a[0][0] * a[1][3] - a[1][0] * a[0][3];
    let s3 = a[0][1] * a[1][2] - a[1][1] * a[0][2];
    let s4 = a[0][1] * a[1][3] - a[1][1] * a[0][3];
    let s5 = a[0][2] * a[1][3] - a[1][2] * a[0][3];

    let c5 = a[2][2] * a[3][3] - a[3][2] * a[2][3];
    let c4 = a[2][1] * a[3][3] - a[3][1] * a[2][3];
    let c3 = a[2][1] * a[3][2] - a[3][1] * a[2][2];
    let c2 = a[2][0] * a[3][3] - a[3][0] * a[2][3];
    let c1 = a[2][0] * a[3][2] - a[3][0] * a[2][2];
    let c0 = a[2][0] * a[3][1] - a[3][0] * a[2][1];

    let det = s0 * c5 - s1 * c4 + s2 * c3 + s3 * c2 - s4 * c1 + s5 * c0;
    if det == 0.0 {
        return None;
    }
    let invdet = 1.0 / det;

    let mut out = [[0.0f64; 4]; 4];
    out[0][0] = (a[1][1] * c5 - a[1][2] * c4 + a[1][3] * c3) * invdet;
    out[0][1] = (-a[0][1] * c5 + a[0][2] * c4 - a[0][3] * c3) * invdet;
    out[0][2] = (a[3][1] * s5 - a[3][2] * s4 + a[3][3] * s3) * invdet;
    out[0][3] = (-a[2][1] * s5 + a[2][2] * s4 - a[2][3] * s3) * invdet;

    out[1][0] = (-a[1][0] * c5 + a[1][2] * c2 - a[1][3] * c1) * invdet;
    out[1][1] = (a[0][0] * c5 - a[0][2] * c2 + a[0][3] * c1) * invdet;
    out[1][2] = (-a[3][0] * s5 + a[3][2] * s2 - a[3][3] * s1) * invdet;
    out[1][3] = (a[2][0] * s5 - a[2][2] * s2 + a[2][3] * s1) * invdet;

    out[2][0] = (a[1][0] * c4 - a[1][1] * c2 + a[1][3] * c0) * invdet;
    out[2][1] = (-a[0][0] * c4 + a[0][1] * c2 - a[0][3] * c0) * invdet;
    out[2][2] = (a[3][0] * s4 - a[3][1] * s2 + a[3][3] * s0) * invdet;
    out[2][3] = (-a[2][0] * s4 + a[2][1] * s2 - a[2][3] * s0) * invdet;

    out[3][0] = (-a[1][0] * c3 + a[1][1] * c1 - a[1][2] * c0) * invdet;
    out[3][1] = (a[0][0] * c3 - a[0][1] * c1 + a[0][2] * c0) * invdet;
    out[3][2] = (-a[3][0] * s3 + a[3][1] * s1 - a[3][2] * s0) * invdet;
    out[3][3] = (a[2][0] * s3 - a[2][1] * s1 + a[2][2] * s0) * invdet;

    Some(out)
}
