//! The autonomous control state machine. Consumes commands from the bus,
//! polls the pose estimate, and steers the car toward the current waypoint.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::driver::{Driver, Percentage};
use crate::producers::CommandForwardProducer;
use crate::telemetry::{relative_degrees, wrap_degrees, Telemetry};
use crate::telemetry_message::CommandMessage;
use crate::waypoint_generator::WaypointGenerator;

/// Heading error at which the steering saturates; smaller errors scale
/// linearly.
const STEERING_SATURATION_D: f64 = 45.0;

/// Throttle commanded while driving. The driver's max throttle cap is the
/// actual speed control; the throttle-versus-steering curve is a tunable
/// that still needs track time to measure.
const NOMINAL_THROTTLE: Percentage = 1.0;

const TICK: Duration = Duration::from_millis(20);

/// Worst-case calibration run length before the state machine gives up
/// waiting and returns to its previous state.
const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Clone, Copy, Debug, PartialEq)]
enum CommandState {
    Idle,
    Running,
    Calibrating,
    Done,
    Shutdown,
}

pub struct Command {
    state: CommandState,
    previous_state: CommandState,
    calibration_deadline: Option<Instant>,
    telemetry: Arc<Mutex<Telemetry>>,
    waypoint_generator: Arc<Mutex<Box<dyn WaypointGenerator>>>,
    driver: Box<dyn Driver>,
    forward_producer: CommandForwardProducer,
}

impl Command {
    pub fn new(
        telemetry: Arc<Mutex<Telemetry>>,
        waypoint_generator: Arc<Mutex<Box<dyn WaypointGenerator>>>,
        driver: Box<dyn Driver>,
    ) -> Command {
        Command {
            state: CommandState::Idle,
            previous_state: CommandState::Idle,
            calibration_deadline: None,
            telemetry,
            waypoint_generator,
            driver,
            forward_producer: CommandForwardProducer::new(),
        }
    }

    /**
     * Drives the car around. Should be run in a thread.
     */
    pub fn run(&mut self, command_rx: Receiver<CommandMessage>, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) && self.state != CommandState::Shutdown {
            while let Ok(message) = command_rx.try_recv() {
                self.handle_command(&message);
            }

            match self.state {
                CommandState::Running => self.run_incremental(),
                CommandState::Calibrating => self.check_calibration_done(),
                CommandState::Idle | CommandState::Done | CommandState::Shutdown => (),
            }

            sleep(TICK);
        }

        // Always stop the car on the way out
        if let Err(err) = self.driver.drive(0.0, 0.0) {
            error!("Unable to stop the car during shutdown: {}", err);
        }
        info!("Command loop shutting down");
    }

    fn handle_command(&mut self, message: &CommandMessage) {
        match message {
            CommandMessage::Start => {
                if self.state == CommandState::Idle {
                    info!("Starting");
                    self.state = CommandState::Running;
                }
            }
            CommandMessage::Stop => {
                if self.state == CommandState::Running {
                    info!("Stopping");
                    self.state = if self.halt() {
                        CommandState::Idle
                    } else {
                        CommandState::Shutdown
                    };
                }
            }
            CommandMessage::Reset => {
                info!("Resetting waypoints");
                self.lock_generator().reset();
                if self.state == CommandState::Done {
                    self.state = CommandState::Idle;
                }
            }
            CommandMessage::CalibrateCompass => {
                if self.state == CommandState::Calibrating {
                    warn!("Compass is already being calibrated");
                    return;
                }
                // The sensor worker owns the serial handle, so hand the
                // command over to it
                self.forward_producer.forward("calibrate-compass");
                self.previous_state = self.state;
                self.calibration_deadline = Some(Instant::now() + CALIBRATION_TIMEOUT);
                self.state = CommandState::Calibrating;
            }
            CommandMessage::SetMaxThrottle(max_throttle) => {
                self.driver.set_max_throttle(*max_throttle);
            }
        }
    }

    /**
     * Decides what to do and commands the vehicle for this time slice.
     */
    fn run_incremental(&mut self) {
        let state = match self.telemetry.lock() {
            Ok(mut telemetry) => {
                // Advance the estimate between sensor readings
                telemetry.update_dead_reckoning();
                telemetry.get_data()
            }
            Err(_) => {
                error!("Telemetry mutex poisoned, shutting down");
                self.state = CommandState::Shutdown;
                return;
            }
        };

        let waypoint = {
            let mut generator = self.lock_generator();
            while generator.reached(state.x_m, state.y_m) {
                info!("Waypoint reached");
                generator.next();
                if generator.done() {
                    break;
                }
            }
            if generator.done() {
                info!("Course done");
                drop(generator);
                self.state = if self.halt() {
                    CommandState::Done
                } else {
                    CommandState::Shutdown
                };
                return;
            }
            match generator.get_current_waypoint(state.x_m, state.y_m) {
                Ok(waypoint) => waypoint,
                Err(err) => {
                    // The generator said it wasn't done, so this is a bug
                    error!("No waypoint available: {}", err);
                    drop(generator);
                    self.state = if self.halt() {
                        CommandState::Done
                    } else {
                        CommandState::Shutdown
                    };
                    return;
                }
            }
        };

        let goal_heading_d = relative_degrees(state.x_m, state.y_m, waypoint.x, waypoint.y);
        let error_d = wrap_degrees(goal_heading_d - state.heading_d);
        let steering = (error_d / STEERING_SATURATION_D).max(-1.0).min(1.0) as Percentage;

        if let Err(err) = self.driver.drive(NOMINAL_THROTTLE, steering) {
            // A bad percentage here is a bug in this loop; stop the car
            error!("Drive command rejected: {}", err);
            self.state = CommandState::Shutdown;
        }
    }

    fn check_calibration_done(&mut self) {
        if let Some(deadline) = self.calibration_deadline {
            if Instant::now() >= deadline {
                self.calibration_deadline = None;
                self.state = self.previous_state;
                info!("Calibration finished, resuming");
            }
        } else {
            self.state = self.previous_state;
        }
    }

    /**
     * Commands the car to a halt. Returns false if the driver rejected it.
     */
    fn halt(&mut self) -> bool {
        match self.driver.drive(0.0, 0.0) {
            Ok(()) => true,
            Err(err) => {
                error!("Unable to stop the car: {}", err);
                false
            }
        }
    }

    fn lock_generator(&self) -> std::sync::MutexGuard<Box<dyn WaypointGenerator>> {
        self.waypoint_generator
            .lock()
            .expect("Waypoint generator mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Command, CommandState};
    use crate::driver::{Driver, Percentage, Result};
    use crate::telemetry::{Point, Telemetry};
    use crate::telemetry_message::CommandMessage;
    use crate::waypoint_generator::{WaypointError, WaypointGenerator};

    struct DummyWaypointGenerator {
        waypoint: Point,
        reached: bool,
        done: bool,
    }

    impl WaypointGenerator for DummyWaypointGenerator {
        fn get_current_waypoint(
            &self,
            _x_m: f64,
            _y_m: f64,
        ) -> std::result::Result<Point, WaypointError> {
            if self.done {
                Err(WaypointError::NoWaypointsLeft)
            } else {
                Ok(self.waypoint)
            }
        }
        fn get_raw_waypoint(&self) -> Point {
            self.waypoint
        }
        fn reached(&mut self, _x_m: f64, _y_m: f64) -> bool {
            self.reached
        }
        fn next(&mut self) {
            self.done = true;
            self.reached = false;
        }
        fn done(&self) -> bool {
            self.done
        }
        fn reset(&mut self) {
            self.done = false;
        }
        fn set_waypoints(&mut self, _waypoints: Vec<Point>) {}
    }

    #[derive(Clone)]
    struct DummyDriver {
        commands: Arc<Mutex<Vec<(Percentage, Percentage)>>>,
    }

    impl DummyDriver {
        fn new() -> DummyDriver {
            DummyDriver {
                commands: Arc::new(Mutex::new(Vec::new())),
            }
        }
        fn last(&self) -> (Percentage, Percentage) {
            *self.commands.lock().unwrap().last().expect("No commands")
        }
    }

    impl Driver for DummyDriver {
        fn drive(&mut self, throttle: Percentage, steering: Percentage) -> Result<()> {
            self.commands.lock().unwrap().push((throttle, steering));
            Ok(())
        }
        fn get_throttle(&self) -> Percentage {
            self.last().0
        }
        fn get_steering(&self) -> Percentage {
            self.last().1
        }
        fn set_max_throttle(&mut self, _max_throttle: Percentage) {}
    }

    fn make_command(
        waypoint: Point,
        heading_d: f64,
    ) -> (Command, DummyDriver) {
        let telemetry = Arc::new(Mutex::new(Telemetry::new(Point { x: 0.0, y: 0.0 }, heading_d)));
        let generator: Arc<Mutex<Box<dyn WaypointGenerator>>> =
            Arc::new(Mutex::new(Box::new(DummyWaypointGenerator {
                waypoint,
                reached: false,
                done: false,
            })));
        let driver = DummyDriver::new();
        let command = Command::new(telemetry, generator, Box::new(driver.clone()));
        (command, driver)
    }

    #[test]
    fn test_start_stop_transitions() {
        let (mut command, driver) = make_command(Point { x: 0.0, y: 100.0 }, 0.0);
        assert_eq!(command.state, CommandState::Idle);

        command.handle_command(&CommandMessage::Start);
        assert_eq!(command.state, CommandState::Running);

        command.handle_command(&CommandMessage::Stop);
        assert_eq!(command.state, CommandState::Idle);
        // Stopping commands the car to a halt
        assert_eq!(driver.last(), (0.0, 0.0));
    }

    #[test]
    fn test_straight_ahead_drives_straight() {
        let (mut command, driver) = make_command(Point { x: 0.0, y: 100.0 }, 0.0);
        command.state = CommandState::Running;
        command.run_incremental();
        let (throttle, steering) = driver.last();
        assert!(throttle > 0.0);
        assert!(steering.abs() < 0.01);
    }

    #[test]
    fn test_target_to_the_right_steers_right() {
        // Facing north, waypoint to the east
        let (mut command, driver) = make_command(Point { x: 100.0, y: 0.0 }, 0.0);
        command.state = CommandState::Running;
        command.run_incremental();
        let (_, steering) = driver.last();
        // 90 degrees off saturates the steering
        assert_eq!(steering, 1.0);
    }

    #[test]
    fn test_target_to_the_left_steers_left() {
        let (mut command, driver) = make_command(Point { x: -100.0, y: 0.0 }, 0.0);
        command.state = CommandState::Running;
        command.run_incremental();
        let (_, steering) = driver.last();
        assert_eq!(steering, -1.0);
    }

    #[test]
    fn test_small_heading_error_scales_linearly() {
        // Waypoint bearing is 45/2 = 22.5 degrees at equal x and y... use a
        // heading offset instead: facing 22.5, waypoint due north
        let (mut command, driver) = make_command(Point { x: 0.0, y: 100.0 }, 22.5);
        command.state = CommandState::Running;
        command.run_incremental();
        let (_, steering) = driver.last();
        assert!((steering - -0.5).abs() < 0.01, "steering was {}", steering);
    }

    #[test]
    fn test_reached_advances_to_done() {
        let telemetry = Arc::new(Mutex::new(Telemetry::new(Point { x: 0.0, y: 0.0 }, 0.0)));
        // The car is sitting on the only waypoint, so the first tick should
        // advance past it and finish the course
        let generator: Arc<Mutex<Box<dyn WaypointGenerator>>> =
            Arc::new(Mutex::new(Box::new(DummyWaypointGenerator {
                waypoint: Point { x: 0.0, y: 0.0 },
                reached: true,
                done: false,
            })));
        let driver = DummyDriver::new();
        let mut command = Command::new(telemetry, generator, Box::new(driver.clone()));
        command.state = CommandState::Running;
        command.run_incremental();
        assert_eq!(command.state, CommandState::Done);
        assert_eq!(driver.last(), (0.0, 0.0));
    }

    #[test]
    fn test_reset_from_done() {
        let (mut command, _driver) = make_command(Point { x: 0.0, y: 100.0 }, 0.0);
        command.state = CommandState::Done;
        command.handle_command(&CommandMessage::Reset);
        assert_eq!(command.state, CommandState::Idle);
        assert!(!command.waypoint_generator.lock().unwrap().done());
    }

    #[test]
    fn test_calibrate_compass_returns_to_previous_state() {
        let (mut command, _driver) = make_command(Point { x: 0.0, y: 100.0 }, 0.0);
        command.handle_command(&CommandMessage::Start);
        command.handle_command(&CommandMessage::CalibrateCompass);
        assert_eq!(command.state, CommandState::Calibrating);
        // A second request is rejected
        command.handle_command(&CommandMessage::CalibrateCompass);
        assert_eq!(command.state, CommandState::Calibrating);

        // Force the deadline into the past
        command.calibration_deadline =
            Some(std::time::Instant::now() - std::time::Duration::from_millis(1));
        command.check_calibration_done();
        assert_eq!(command.state, CommandState::Running);
    }

    #[test]
    fn test_start_ignored_while_calibrating() {
        let (mut command, _driver) = make_command(Point { x: 0.0, y: 100.0 }, 0.0);
        command.handle_command(&CommandMessage::CalibrateCompass);
        command.handle_command(&CommandMessage::Start);
        assert_eq!(command.state, CommandState::Calibrating);
    }
}
