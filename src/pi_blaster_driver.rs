//! Drives the steering and throttle servos through the pi-blaster daemon's
//! device file.
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::driver::{Driver, DriverError, Percentage, Result};
use crate::telemetry::Telemetry;

pub const THROTTLE_GPIO_PIN: u32 = 18;
pub const THROTTLE_NEUTRAL_US: u32 = 1500;
pub const THROTTLE_DIFF_US: u32 = 500;

pub const STEERING_GPIO_PIN: u32 = 4;
pub const STEERING_NEUTRAL_US: u32 = 1650;
pub const STEERING_DIFF_US: u32 = 300;

// Purposely limit the reverse in case we try to go back while still rolling,
// to prevent damage to the gear box
const REVERSE_THROTTLE_LIMIT: Percentage = -0.25;

/**
 * Hardware shim that sets a pin to a pulse width. pi-blaster wants the duty
 * fraction of its 10 ms cycle, so a microsecond value maps to us * 0.0001.
 */
pub trait Pwm: Send {
    fn set_pulse_width_us(&mut self, pin: u32, pulse_width_us: u32) -> io::Result<()>;
}

/// Writes "pin=fraction" lines to /dev/pi-blaster.
pub struct PiBlaster {
    blaster: File,
}

impl PiBlaster {
    pub fn new() -> io::Result<PiBlaster> {
        Ok(PiBlaster {
            blaster: OpenOptions::new().write(true).open("/dev/pi-blaster")?,
        })
    }
}

impl Pwm for PiBlaster {
    fn set_pulse_width_us(&mut self, pin: u32, pulse_width_us: u32) -> io::Result<()> {
        let message = format!("{}={}\n", pin, pulse_width_us as f32 * 0.0001);
        self.blaster.write_all(message.as_bytes())
    }
}

pub struct PiBlasterDriver<P: Pwm> {
    pwm: P,
    telemetry: Arc<Mutex<Telemetry>>,
    throttle: Percentage,
    steering: Percentage,
    max_throttle: Percentage,
}

impl<P: Pwm> PiBlasterDriver<P> {
    pub fn new(pwm: P, telemetry: Arc<Mutex<Telemetry>>) -> PiBlasterDriver<P> {
        PiBlasterDriver {
            pwm,
            telemetry,
            throttle: 0.0,
            steering: 0.0,
            max_throttle: 1.0,
        }
    }

    /**
     * Returns the throttle pulse width, rounded down to the nearest 10 us.
     */
    fn get_throttle_us(percentage: Percentage) -> Result<u32> {
        if !(REVERSE_THROTTLE_LIMIT..=1.0).contains(&percentage) {
            return Err(DriverError::BadPercentage("throttle"));
        }
        let us = (THROTTLE_NEUTRAL_US as f32 + THROTTLE_DIFF_US as f32 * percentage) as u32;
        Ok(us / 10 * 10)
    }

    /**
     * Returns the steering pulse width, rounded down to the nearest 10 us.
     */
    fn get_steering_us(percentage: Percentage) -> Result<u32> {
        if !(-1.0..=1.0).contains(&percentage) {
            return Err(DriverError::BadPercentage("steering"));
        }
        let us = (STEERING_NEUTRAL_US as f32 + STEERING_DIFF_US as f32 * percentage) as u32;
        Ok(us / 10 * 10)
    }
}

impl<P: Pwm> Driver for PiBlasterDriver<P> {
    fn drive(&mut self, throttle: Percentage, steering: Percentage) -> Result<()> {
        if !(-1.0..=1.0).contains(&throttle) {
            return Err(DriverError::BadPercentage("throttle"));
        }
        if !(-1.0..=1.0).contains(&steering) {
            return Err(DriverError::BadPercentage("steering"));
        }

        match self.telemetry.lock() {
            Ok(mut telemetry) => telemetry.process_drive_command(throttle, steering),
            Err(_) => error!("Telemetry mutex poisoned"),
        }
        debug!("Throttle: {}, steering: {}", throttle, steering);

        let mut limited_throttle = throttle.min(self.max_throttle).max(-self.max_throttle);
        if limited_throttle < REVERSE_THROTTLE_LIMIT {
            limited_throttle = REVERSE_THROTTLE_LIMIT;
        }
        self.throttle = limited_throttle;
        self.steering = steering;

        let throttle_us = PiBlasterDriver::<P>::get_throttle_us(limited_throttle)?;
        let steering_us = PiBlasterDriver::<P>::get_steering_us(steering)?;
        if let Err(err) = self.pwm.set_pulse_width_us(THROTTLE_GPIO_PIN, throttle_us) {
            error!("Unable to send throttle command: {}", err);
        }
        if let Err(err) = self.pwm.set_pulse_width_us(STEERING_GPIO_PIN, steering_us) {
            error!("Unable to send steering command: {}", err);
        }
        Ok(())
    }

    fn get_throttle(&self) -> Percentage {
        self.throttle
    }

    fn get_steering(&self) -> Percentage {
        self.steering
    }

    fn set_max_throttle(&mut self, max_throttle: Percentage) {
        self.max_throttle = max_throttle.max(0.0).min(1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{PiBlasterDriver, Pwm, STEERING_GPIO_PIN, THROTTLE_GPIO_PIN};
    use crate::driver::{Driver, DriverError};
    use crate::telemetry::{Point, Telemetry};

    struct RecordingPwm {
        writes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl Pwm for RecordingPwm {
        fn set_pulse_width_us(&mut self, pin: u32, pulse_width_us: u32) -> std::io::Result<()> {
            self.writes.lock().unwrap().push((pin, pulse_width_us));
            Ok(())
        }
    }

    fn make_driver() -> (PiBlasterDriver<RecordingPwm>, Arc<Mutex<Vec<(u32, u32)>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let pwm = RecordingPwm {
            writes: writes.clone(),
        };
        let telemetry = Arc::new(Mutex::new(Telemetry::new(Point { x: 0.0, y: 0.0 }, 0.0)));
        (PiBlasterDriver::new(pwm, telemetry), writes)
    }

    type TestDriver = PiBlasterDriver<RecordingPwm>;

    #[test]
    fn test_get_throttle_us() {
        assert_eq!(TestDriver::get_throttle_us(0.0), Ok(1500));
        assert_eq!(TestDriver::get_throttle_us(1.0), Ok(2000));
        assert_eq!(TestDriver::get_throttle_us(-0.25), Ok(1370));
        assert_eq!(TestDriver::get_throttle_us(0.5), Ok(1750));
        // Rounded down to the nearest 10 us
        assert_eq!(TestDriver::get_throttle_us(0.013), Ok(1500));
    }

    #[test]
    fn test_get_throttle_us_bad_percentage() {
        assert_eq!(
            TestDriver::get_throttle_us(-0.251),
            Err(DriverError::BadPercentage("throttle"))
        );
        assert_eq!(
            TestDriver::get_throttle_us(1.001),
            Err(DriverError::BadPercentage("throttle"))
        );
    }

    #[test]
    fn test_get_steering_us() {
        assert_eq!(TestDriver::get_steering_us(0.0), Ok(1650));
        assert_eq!(TestDriver::get_steering_us(1.0), Ok(1950));
        assert_eq!(TestDriver::get_steering_us(-1.0), Ok(1350));
        assert_eq!(
            TestDriver::get_steering_us(-1.01),
            Err(DriverError::BadPercentage("steering"))
        );
    }

    #[test]
    fn test_drive_sets_both_servos() {
        let (mut driver, writes) = make_driver();
        driver.drive(0.5, -1.0).unwrap();
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0], (THROTTLE_GPIO_PIN, 1750));
        assert_eq!(writes[1], (STEERING_GPIO_PIN, 1350));
        assert_eq!(driver.get_throttle(), 0.5);
        assert_eq!(driver.get_steering(), -1.0);
    }

    #[test]
    fn test_drive_rejects_out_of_range() {
        let (mut driver, _writes) = make_driver();
        assert_eq!(
            driver.drive(1.5, 0.0),
            Err(DriverError::BadPercentage("throttle"))
        );
        assert_eq!(
            driver.drive(0.0, -2.0),
            Err(DriverError::BadPercentage("steering"))
        );
    }

    #[test]
    fn test_drive_clamps_reverse_throttle() {
        let (mut driver, writes) = make_driver();
        driver.drive(-1.0, 0.0).unwrap();
        // Reverse is clamped to protect the gear box
        assert_eq!(driver.get_throttle(), -0.25);
        assert_eq!(writes.lock().unwrap()[0], (THROTTLE_GPIO_PIN, 1370));
    }

    #[test]
    fn test_max_throttle_caps_forward() {
        let (mut driver, writes) = make_driver();
        driver.set_max_throttle(0.5);
        driver.drive(1.0, 0.0).unwrap();
        assert_eq!(driver.get_throttle(), 0.5);
        assert_eq!(writes.lock().unwrap()[0], (THROTTLE_GPIO_PIN, 1750));
    }

    #[test]
    fn test_set_max_throttle_clamped_to_unit() {
        let (mut driver, _writes) = make_driver();
        driver.set_max_throttle(100.0);
        driver.drive(1.0, 0.0).unwrap();
        assert_eq!(driver.get_throttle(), 1.0);
    }
}
