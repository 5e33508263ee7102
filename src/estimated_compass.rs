//! Estimates readings from the compass, because it's slow to update. When
//! the car turns, the magnetometer needle takes a while to swing around, so
//! mid-turn we trust our own estimate and blend the raw readings back in
//! once the needle catches up.
use crate::telemetry::{difference_d, wrap_degrees, Degrees};

// Both values are from observation and should be re-measured if the module
// mounting changes
const DEAD_TIME_S: f64 = 0.25;
const TRAVEL_RATE_D_S: f64 = 60.0;

/// Approximate turn rate of the car at full steering lock.
const CAR_TURN_RATE_D_S: f64 = 90.0;

/// Steering inputs smaller than this don't swing the needle.
const TURN_THRESHOLD: f32 = 0.1;

pub struct EstimatedCompass {
    dead_time_s: f64,
    travel_rate_d_s: f64,
    turn_time_s: Option<f64>,
    update_time_s: f64,
    last_turn: f32,
    turn: f32,
    estimated_compass_d: Degrees,
    estimated_heading_d: Degrees,
    delay: bool,
    compass_turning: bool,
}

impl EstimatedCompass {
    pub fn new() -> EstimatedCompass {
        EstimatedCompass::with_rates(DEAD_TIME_S, TRAVEL_RATE_D_S)
    }

    pub fn with_rates(dead_time_s: f64, travel_rate_d_s: f64) -> EstimatedCompass {
        EstimatedCompass {
            dead_time_s,
            travel_rate_d_s,
            turn_time_s: None,
            update_time_s: 0.0,
            last_turn: 0.0,
            turn: 0.0,
            estimated_compass_d: 0.0,
            estimated_heading_d: 0.0,
            delay: false,
            compass_turning: false,
        }
    }

    /**
     * Takes the vehicle's commanded turn into account.
     */
    pub fn process_drive_command(
        &mut self,
        steering: f32,
        compass_heading_d: Degrees,
        now_s: f64,
    ) {
        self.turn_time_s = Some(now_s);
        self.update_time_s = now_s;
        self.last_turn = self.turn;
        self.turn = steering;

        if steering.abs() > TURN_THRESHOLD {
            // Switching directions means the needle has to stop and reverse,
            // so insert the dead time again
            if self.last_turn == 0.0
                || (self.last_turn > 0.0 && steering < 0.0)
                || (self.last_turn < 0.0 && steering > 0.0)
            {
                self.delay = true;
                debug!("Delaying compass estimate");
            }
            if !self.compass_turning {
                self.estimated_heading_d = compass_heading_d;
            }
            self.compass_turning = true;
            self.estimated_compass_d = compass_heading_d;
        }
    }

    /**
     * Returns the estimated heading. If the car has been driving straight
     * for a while, this returns the plain compass heading.
     */
    pub fn get_estimated_heading(&mut self, compass_heading_d: Degrees, now_s: f64) -> Degrees {
        if !self.compass_turning {
            return compass_heading_d;
        }

        let time_diff_s = now_s - self.update_time_s;
        self.update_time_s = now_s;

        self.estimated_heading_d = wrap_degrees(
            self.estimated_heading_d + self.car_turn_rate_d_s() * time_diff_s,
        );

        if self.delay {
            if let Some(turn_time_s) = self.turn_time_s {
                if turn_time_s + self.dead_time_s < now_s {
                    self.delay = false;
                    debug!("Done delaying compass estimate");
                }
            }
        } else {
            let step_d = self.compass_turn_rate_d_s() * time_diff_s;
            self.estimated_compass_d =
                wrap_degrees(self.estimated_compass_d + step_d);

            if difference_d(self.estimated_compass_d, self.estimated_heading_d) < step_d.abs() {
                debug!("Compass done turning");
                self.compass_turning = false;
            }
        }

        debug!(
            "Estimated heading: {:.1}, estimated compass: {:.1}, raw compass: {:.1}",
            self.estimated_heading_d, self.estimated_compass_d, compass_heading_d,
        );
        self.estimated_heading_d
    }

    /**
     * The approximate turn rate of the car for the commanded steering.
     */
    fn car_turn_rate_d_s(&self) -> f64 {
        f64::from(self.turn) * CAR_TURN_RATE_D_S
    }

    /**
     * The approximate swing rate of the compass needle.
     */
    fn compass_turn_rate_d_s(&self) -> f64 {
        if self.turn < 0.0 {
            -self.travel_rate_d_s
        } else {
            self.travel_rate_d_s
        }
    }
}

impl Default for EstimatedCompass {
    fn default() -> EstimatedCompass {
        EstimatedCompass::new()
    }
}

#[cfg(test)]
mod tests {
    use super::EstimatedCompass;
    use crate::telemetry::difference_d;

    #[test]
    fn test_straight_driving_returns_raw_heading() {
        let mut compass = EstimatedCompass::new();
        assert_eq!(compass.get_estimated_heading(123.0, 0.0), 123.0);
        compass.process_drive_command(0.0, 123.0, 0.1);
        assert_eq!(compass.get_estimated_heading(124.0, 0.2), 124.0);
    }

    #[test]
    fn test_turning_advances_estimate() {
        let mut compass = EstimatedCompass::new();
        compass.process_drive_command(1.0, 0.0, 0.0);
        // During the dead time, the estimate advances with the car's turn
        // rate even though the raw compass hasn't moved
        let heading = compass.get_estimated_heading(0.0, 0.1);
        assert!(heading > 0.0, "estimate did not advance: {}", heading);
        let later = compass.get_estimated_heading(0.0, 0.2);
        assert!(later > heading);
    }

    #[test]
    fn test_estimate_converges_after_turn_ends() {
        let mut compass = EstimatedCompass::new();
        compass.process_drive_command(0.5, 0.0, 0.0);
        let mut now_s = 0.0;
        // Drive the model well past the dead time; the needle model swings
        // toward the estimated heading until they agree
        for _ in 0..100 {
            now_s += 0.1;
            compass.get_estimated_heading(45.0, now_s);
        }
        // Once the needle has caught up, the raw reading is trusted again
        let heading = compass.get_estimated_heading(45.0, now_s + 0.1);
        assert_eq!(heading, 45.0);
    }

    #[test]
    fn test_custom_rates() {
        // With no dead time and a fast needle, the model hands control back
        // to the raw compass almost immediately after a turn command
        let mut compass = EstimatedCompass::with_rates(0.0, 10000.0);
        compass.process_drive_command(1.0, 90.0, 0.0);
        compass.get_estimated_heading(90.0, 0.1);
        compass.get_estimated_heading(90.0, 0.2);
        let heading = compass.get_estimated_heading(90.0, 0.3);
        assert_eq!(heading, 90.0);
    }

    #[test]
    fn test_direction_switch_delays_again() {
        let mut compass = EstimatedCompass::new();
        compass.process_drive_command(0.5, 10.0, 0.0);
        compass.get_estimated_heading(10.0, 0.1);
        // Reversing the turn direction re-enters the dead time
        compass.process_drive_command(-0.5, 10.0, 0.2);
        let heading = compass.get_estimated_heading(10.0, 0.3);
        // Turning the other way now
        assert!(difference_d(heading, 10.0) < 45.0);
    }
}
