//! The interface used to drive the car.
use std::fmt;
use std::{error, result};

pub type Percentage = f32;
pub type Result<T> = result::Result<T, DriverError>;

#[derive(Debug, PartialEq)]
pub enum DriverError {
    /// A throttle or steering percentage outside of the legal range. This is
    /// a caller bug, not something to recover from.
    BadPercentage(&'static str),
}

impl fmt::Display for DriverError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverError::BadPercentage(what) => write!(formatter, "Bad {}", what),
        }
    }
}

impl error::Error for DriverError {}

/**
 * Provides an interface to drive the car.
 */
pub trait Driver: Send {
    /**
     * Sends a command to the RC car. Throttle should be between -1.0 for
     * reverse and 1.0 for forward, steering between -1.0 for left and 1.0
     * for right.
     */
    fn drive(&mut self, throttle: Percentage, steering: Percentage) -> Result<()>;

    fn get_throttle(&self) -> Percentage;

    fn get_steering(&self) -> Percentage;

    /**
     * Caps the forward throttle.
     */
    fn set_max_throttle(&mut self, max_throttle: Percentage);
}
