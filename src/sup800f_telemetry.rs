//! Reads messages from the SUP800F module and publishes canonical readings
//! on the telemetry exchange. The module can only report NMEA sentences or
//! binary inertial frames, not both, so the worker flips between the modes:
//! one GPS fix, then three binary frames, and back.
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{spawn, JoinHandle};
use std::time::{Duration, Instant};

use crate::message_bus::{consume_messages, COMMAND_FORWARDED_EXCHANGE};
use crate::nmea::{NmeaError, NmeaMessage};
use crate::producers::TelemetryProducer;
use crate::sup800f::{
    get_message, parse_binary, switch_to_binary_mode, switch_to_nmea_mode, Result, Sup800fError,
};
use crate::telemetry::{wrap_degrees, Degrees};

const DEVICE_ID: &str = "sup800f";

/// Magnetic declination at the reference site.
const MAGNETIC_DECLINATION_D: Degrees = 8.666;

/// Below this speed the module computes its course from its own
/// uncalibrated compass, so we substitute our own heading.
const COMPASS_SPEED_CUTOFF_M_S: f64 = 10.0 * 1000.0 / 3600.0;

/// Smaller HDOP is more precise; the scale to meters is a guess.
const HDOP_TO_ACCURACY_M: f64 = 5.0;

/// How long the operator should drive in circles for a calibration run.
pub const CALIBRATION_DURATION: Duration = Duration::from_secs(10);

/// Consecutive read failures tolerated before the mode gets reset.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

const BINARY_FRAMES_PER_FIX: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
enum CalibrationState {
    Idle,
    Requested(Duration),
    Running,
}

/**
 * Requests compass calibration runs. Shared between the bus consumer that
 * receives the command and the worker that performs the run; only one run
 * may be active at a time.
 */
pub struct CalibrationHandle {
    state: Mutex<CalibrationState>,
}

impl CalibrationHandle {
    pub fn new() -> CalibrationHandle {
        CalibrationHandle {
            state: Mutex::new(CalibrationState::Idle),
        }
    }

    /**
     * Requests a calibration run. Ignored with a warning if one is already
     * requested or running.
     */
    pub fn request(&self, duration: Duration) {
        let mut state = self.state.lock().expect("Calibration state poisoned");
        match *state {
            CalibrationState::Idle => *state = CalibrationState::Requested(duration),
            _ => warn!("Compass is already being calibrated"),
        }
    }

    fn take(&self) -> Option<Duration> {
        let mut state = self.state.lock().expect("Calibration state poisoned");
        if let CalibrationState::Requested(duration) = *state {
            *state = CalibrationState::Running;
            Some(duration)
        } else {
            None
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock().expect("Calibration state poisoned");
        *state = CalibrationState::Idle;
    }
}

impl Default for CalibrationHandle {
    fn default() -> CalibrationHandle {
        CalibrationHandle::new()
    }
}

/**
 * Spawns the consumer that forwards calibrate-compass commands from the bus
 * to the worker.
 */
pub fn spawn_calibration_listener(calibration: Arc<CalibrationHandle>) -> JoinHandle<()> {
    spawn(move || {
        consume_messages(COMMAND_FORWARDED_EXCHANGE, |message| {
            if message == "calibrate-compass" {
                calibration.request(CALIBRATION_DURATION);
            }
        });
        info!("Calibration listener shutting down");
    })
}

/**
 * Rejects magnetometer readings whose magnitude is far outside the
 * calibration statistics, and grades the rest with a confidence.
 */
struct MagnitudeFilter {
    mean: f64,
    std_dev: f64,
    dropped_messages: u32,
    dropped_threshold: u32,
}

impl MagnitudeFilter {
    fn new(mean: f64, std_dev: f64) -> MagnitudeFilter {
        MagnitudeFilter {
            mean,
            std_dev,
            dropped_messages: 0,
            dropped_threshold: 10,
        }
    }

    /**
     * Returns the confidence in [0, 1] for a reading, or None for an
     * outlier. In a normal distribution, 95% of readings should be within
     * two standard deviations.
     */
    fn confidence(&mut self, magnitude: f64) -> Option<f64> {
        let std_devs_away = (self.mean - magnitude).abs() / self.std_dev;
        if std_devs_away > 2.0 {
            self.dropped_messages += 1;
            if self.dropped_messages > self.dropped_threshold {
                warn!(
                    "Dropped {} compass messages in a row, std dev = {:.3}",
                    self.dropped_messages, std_devs_away,
                );
                self.dropped_messages = 0;
                self.dropped_threshold += 10;
            }
            return None;
        }
        self.dropped_messages = 0;
        self.dropped_threshold = 10;

        if std_devs_away > 1.0 {
            Some(2.0 - std_devs_away)
        } else {
            Some(1.0)
        }
    }
}

/**
 * Computes a compass heading from offset-corrected magnetometer axes.
 */
fn compass_heading_d(flux_x: f64, flux_y: f64) -> Degrees {
    wrap_degrees(270.0 - flux_y.atan2(flux_x).to_degrees() + MAGNETIC_DECLINATION_D)
}

/**
 * Midpoint offsets and magnitude statistics from a calibration recording.
 */
fn calibration_statistics(readings: &[(f64, f64)]) -> ([f64; 2], f64, f64) {
    let mut maxes = [std::f64::MIN; 2];
    let mut mins = [std::f64::MAX; 2];
    for (flux_x, flux_y) in readings.iter() {
        maxes[0] = maxes[0].max(*flux_x);
        maxes[1] = maxes[1].max(*flux_y);
        mins[0] = mins[0].min(*flux_x);
        mins[1] = mins[1].min(*flux_y);
    }
    let offsets = [
        (maxes[0] + mins[0]) * 0.5,
        (maxes[1] + mins[1]) * 0.5,
    ];

    let magnitudes: Vec<f64> = readings
        .iter()
        .map(|(flux_x, flux_y)| (flux_x - offsets[0]).powi(2) + (flux_y - offsets[1]).powi(2))
        .collect();
    let mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
    let variance = magnitudes
        .iter()
        .map(|magnitude| (magnitude - mean).powi(2))
        .sum::<f64>()
        / magnitudes.len() as f64;
    (offsets, mean, variance.sqrt())
}

/**
 * Reader of the GPS module. Owns the serial handle and feeds the telemetry
 * exchange.
 */
pub struct Sup800fTelemetry<S: Read + Write> {
    serial: S,
    telemetry: TelemetryProducer,
    calibration: Arc<CalibrationHandle>,
    // These initial measurements are from a calibration observation
    compass_offsets: [f64; 2],
    magnitude_filter: MagnitudeFilter,
    nmea_mode: bool,
    last_compass_heading_d: Degrees,
    hdop: f64,
    compass_calibrated: bool,
}

impl<S: Read + Write> Sup800fTelemetry<S> {
    pub fn new(serial: S, calibration: Arc<CalibrationHandle>) -> Sup800fTelemetry<S> {
        Sup800fTelemetry {
            serial,
            telemetry: TelemetryProducer::new(),
            calibration,
            compass_offsets: [-11.87, -5.97],
            magnitude_filter: MagnitudeFilter::new(353.310, 117.918),
            nmea_mode: true,
            last_compass_heading_d: 0.0,
            hdop: 5.0,
            compass_calibrated: false,
        }
    }

    /**
     * Runs in a thread, handing raw readings to the telemetry exchange.
     */
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            if let Err(err) = self.run_inner(stop) {
                debug!("Sensor worker error: {}", err);
                // Maybe resetting the module mode will help
                let reset = if self.nmea_mode {
                    switch_to_nmea_mode(&mut self.serial)
                } else {
                    switch_to_binary_mode(&mut self.serial)
                };
                if let Err(err) = reset {
                    debug!("Unable to reset mode: {}", err);
                }
            }
        }
        info!("Sensor worker shutting down");
    }

    fn run_inner(&mut self, stop: &AtomicBool) -> Result<()> {
        let mut binary_count = 0;
        let mut consecutive_errors = 0;
        while !stop.load(Ordering::Relaxed) {
            if let Some(duration) = self.calibration.take() {
                let result = self.calibrate_compass(duration);
                self.calibration.finish();
                result?;
            }

            let progressed = if self.nmea_mode {
                match self.process_nmea() {
                    Ok(got_fix) => {
                        consecutive_errors = 0;
                        if got_fix {
                            switch_to_binary_mode(&mut self.serial)?;
                            self.nmea_mode = false;
                        }
                        true
                    }
                    Err(err) => {
                        warn!("Unable to process sentence: {}", err);
                        false
                    }
                }
            } else {
                match self.process_binary() {
                    Ok(()) => {
                        consecutive_errors = 0;
                        binary_count += 1;
                        if binary_count >= BINARY_FRAMES_PER_FIX {
                            switch_to_nmea_mode(&mut self.serial)?;
                            self.nmea_mode = true;
                            binary_count = 0;
                        }
                        true
                    }
                    Err(err) => {
                        warn!("Unable to process binary frame: {}", err);
                        false
                    }
                }
            };

            if !progressed {
                consecutive_errors += 1;
                if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                    return Err(Sup800fError::ModeChange);
                }
            }
        }
        Ok(())
    }

    /**
     * Reads and processes a single NMEA sentence. Returns true once a GPS
     * fix has been handled and it's time to collect binary frames.
     */
    fn process_nmea(&mut self) -> Result<bool> {
        let line = self.read_line()?;
        if line.is_empty() {
            return Ok(false);
        }
        match NmeaMessage::parse(&line) {
            Ok(NmeaMessage::Rmc(rmc)) => {
                let heading_d = if rmc.speed_m_s < COMPASS_SPEED_CUTOFF_M_S {
                    self.last_compass_heading_d
                } else {
                    rmc.course_d
                };
                self.telemetry.gps_reading(
                    rmc.latitude_d,
                    rmc.longitude_d,
                    self.hdop * HDOP_TO_ACCURACY_M,
                    heading_d,
                    rmc.speed_m_s,
                    rmc.timestamp_s,
                    DEVICE_ID,
                );
                Ok(true)
            }
            Ok(NmeaMessage::Gsa(gsa)) => {
                self.hdop = gsa.hdop;
                Ok(true)
            }
            Ok(NmeaMessage::Sti(sti)) => {
                if sti.compass_calibrated && !self.compass_calibrated {
                    info!("Compass calibrated");
                }
                self.compass_calibrated = sti.compass_calibrated;
                Ok(false)
            }
            Err(NmeaError::UnknownSentence) => Ok(false),
            Err(err) => {
                // Log and discard; a bad sentence never kills the worker
                debug!("Ignoring sentence: {}", err);
                Ok(false)
            }
        }
    }

    /**
     * Reads and processes a single binary frame.
     */
    fn process_binary(&mut self) -> Result<()> {
        let message = get_message(&mut self.serial)?;
        let binary = parse_binary(&message)?;

        self.telemetry.accelerometer_reading(
            binary.acceleration_g_x,
            binary.acceleration_g_y,
            binary.acceleration_g_z,
            DEVICE_ID,
        );

        let flux_x = f64::from(binary.magnetic_flux_ut_x) - self.compass_offsets[0];
        let flux_y = f64::from(binary.magnetic_flux_ut_y) - self.compass_offsets[1];
        if flux_x == 0.0 {
            return Ok(());
        }
        self.last_compass_heading_d = compass_heading_d(flux_x, flux_y);

        let magnitude = flux_x.powi(2) + flux_y.powi(2);
        if let Some(confidence) = self.magnitude_filter.confidence(magnitude) {
            self.telemetry
                .compass_reading(self.last_compass_heading_d, confidence, DEVICE_ID);
        }
        Ok(())
    }

    /**
     * Calibrates the compass. The operator should be driving the car in
     * circles for the whole run.
     */
    fn calibrate_compass(&mut self, duration: Duration) -> Result<()> {
        info!("Calibrating compass; setting to binary mode");
        switch_to_binary_mode(&mut self.serial)?;
        self.nmea_mode = false;
        for _ in 0..10 {
            get_message(&mut self.serial)?;
        }

        let mut readings = Vec::new();
        let end = Instant::now() + duration;
        while Instant::now() < end {
            let message = get_message(&mut self.serial)?;
            let binary = match parse_binary(&message) {
                Ok(binary) => binary,
                Err(err) => {
                    info!("Unable to parse binary message: {}", err);
                    continue;
                }
            };
            readings.push((
                f64::from(binary.magnetic_flux_ut_x),
                f64::from(binary.magnetic_flux_ut_y),
            ));
        }

        if readings.is_empty() {
            warn!("No readings recorded, keeping previous calibration");
        } else {
            let (offsets, mean, std_dev) = calibration_statistics(&readings);
            self.compass_offsets = offsets;
            self.magnitude_filter = MagnitudeFilter::new(mean, std_dev);
            info!(
                "Compass calibrated, offsets are ({:.2}, {:.2}), magnitudes mean: {:.3}, standard deviation: {:.3}",
                offsets[0], offsets[1], mean, std_dev,
            );
        }

        switch_to_nmea_mode(&mut self.serial)?;
        self.nmea_mode = true;
        Ok(())
    }

    /**
     * Reads a text line from the serial port. Timeouts return an empty line
     * so quiet periods don't count as failures.
     */
    fn read_line(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.serial.read_exact(&mut byte) {
                Ok(()) => (),
                Err(ref err)
                    if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock =>
                {
                    return Ok(String::new());
                }
                Err(err) => return Err(Sup800fError::SerialIo(err)),
            }
            bytes.push(byte[0]);
            if byte[0] == b'\n' || bytes.len() > 1024 {
                break;
            }
        }
        String::from_utf8(bytes).map_err(|_| {
            Sup800fError::SerialIo(std::io::Error::new(
                ErrorKind::InvalidData,
                "Not a UTF-8 message",
            ))
        })
    }
}
