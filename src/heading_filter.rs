//! Kalman filter for the heading of the vehicle.
use crate::telemetry::{wrap_degrees, Degrees};

type Matrix22 = [[f64; 2]; 2];
type Vector2 = [f64; 2];

pub struct HeadingFilter {
    // heading d, heading delta d/s
    estimates: Vector2,        // x
    covariance: Matrix22,      // P
    measurement_noise: Matrix22, // R
    process_noise: Matrix22,   // Q
}

impl HeadingFilter {
    pub fn new(initial_heading_d: Degrees) -> HeadingFilter {
        HeadingFilter {
            estimates: [wrap_degrees(initial_heading_d), 0.0],
            covariance: [[1000.0, 0.0], [0.0, 1000.0]],
            measurement_noise: [[3.0, 0.0], [0.0, 0.3]],
            process_noise: [[0.01, 0.0], [0.0, 0.01]],
        }
    }

    /**
     * Updates the state estimation using the provided heading measurement.
     */
    pub fn update_heading(&mut self, heading_d: Degrees) {
        let measurements = [heading_d, 0.0];
        let observer_matrix = [[1.0, 0.0], [0.0, 0.0]];
        // Heading observations don't rely on time, so ignore the time diff
        self.update(&measurements, &observer_matrix, 0.0);
    }

    /**
     * Updates the state estimation using the provided heading rate in
     * degrees per second.
     */
    pub fn update_heading_delta(&mut self, heading_d_s: f64, time_diff_s: f64) {
        let measurements = [0.0, heading_d_s];
        let observer_matrix = [[0.0, 0.0], [0.0, 1.0]];
        self.update(&measurements, &observer_matrix, time_diff_s);
    }

    /**
     * Returns the estimated true heading.
     */
    pub fn estimated_heading(&self) -> Degrees {
        wrap_degrees(self.estimates[0])
    }

    /**
     * Returns the estimated heading rate in degrees per second.
     */
    pub fn estimated_heading_rate(&self) -> f64 {
        self.estimates[1]
    }

    /**
     * Runs the Kalman update using the provided measurements.
     */
    fn update(&mut self, measurements: &Vector2, observer_matrix: &Matrix22, time_diff_s: f64) {
        // Prediction step
        // x = A * x
        let transition = [[1.0, time_diff_s], [0.0, 1.0]]; // A
        self.estimates = multiply_vector(&transition, &self.estimates);

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
            &self.measurement_noise,
        );
        let kalman_gain = multiply(&multiply(&self.covariance, &observer_matrix_t), &invert(&hphtr));

        // Determine innovation or residual and update our estimate
        // x = x + K * (z - H * x)
        let mut zhx = [
            measurements[0] - (observer_matrix[0][0] * self.estimates[0]
                + observer_matrix[0][1] * self.estimates[1]),
            measurements[1] - (observer_matrix[1][0] * self.estimates[0]
                + observer_matrix[1][1] * self.estimates[1]),
        ];
        zhx[0] = wrap_degrees(zhx[0]);

        self.estimates = [
            self.estimates[0] + kalman_gain[0][0] * zhx[0] + kalman_gain[0][1] * zhx[1],
            self.estimates[1] + kalman_gain[1][0] * zhx[0] + kalman_gain[1][1] * zhx[1],
        ];
        self.estimates[0] = wrap_degrees(self.estimates[0]);

        // Update the covariance
        // P = (I - K * H) * P
        let identity = [[1.0, 0.0], [0.0, 1.0]];
        let ikh = subtract(&identity, &multiply(&kalman_gain, observer_matrix));
        self.covariance = multiply(&ikh, &self.covariance);
    }
}

fn multiply(a: &Matrix22, b: &Matrix22) -> Matrix22 {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

fn multiply_vector(a: &Matrix22, v: &Vector2) -> Vector2 {
    [
        a[0][0] * v[0] + a[0][1] * v[1],
        a[1][0] * v[0] + a[1][1] * v[1],
    ]
}

fn add(a: &Matrix22, b: &Matrix22) -> Matrix22 {
    [
        [a[0][0] + b[0][0], a[0][1] + b[0][1]],
        [a[1][0] + b[1][0], a[1][1] + b[1][1]],
    ]
}

fn subtract(a: &Matrix22, b: &Matrix22) -> Matrix22 {
    [
        [a[0][0] - b[0][0], a[0][1] - b[0][1]],
        [a[1][0] - b[1][0], a[1][1] - b[1][1]],
    ]
}

fn transpose(a: &Matrix22) -> Matrix22 {
    [[a[0][0], a[1][0]], [a[0][1], a[1][1]]]
}

/**
 * Inverts a matrix. Zero diagonal entries of a singular matrix are nudged
 * and the inversion retried.
 */
fn invert(a: &Matrix22) -> Matrix22 {
    let mut matrix = *a;
    let mut determinant = matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0];
    if determinant == 0.0 {
        for diagonal in 0..2 {
            if matrix[diagonal][diagonal] == 0.0 {
                matrix[diagonal][diagonal] = 0.00001;
            }
        }
        determinant = matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0];
    }
    [
        [matrix[1][1] / determinant, -matrix[0][1] / determinant],
        [-matrix[1][0] / determinant, matrix[0][0] / determinant],
    ]
}
