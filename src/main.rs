#[macro_use]
extern crate log;

use std::io::Read;
use std::process::{exit, Child};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{sleep, spawn, JoinHandle};
use std::time::Duration;

use getopts::{Matches, Options};
use serialport::prelude::*;
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, WriteLogger};

use grasshopper_control::bus_logger::BusLogger;
#[cfg(target_os = "linux")]
use grasshopper_control::button::Button;
use grasshopper_control::chase_waypoint_generator::ChaseWaypointGenerator;
use grasshopper_control::command::Command;
use grasshopper_control::driver::Driver;
use grasshopper_control::kml;
use grasshopper_control::message_bus;
use grasshopper_control::message_bus::{
    consume_messages, COMMAND_EXCHANGE, COMMAND_FORWARDED_EXCHANGE, LOGS_EXCHANGE,
    TELEMETRY_EXCHANGE, WAYPOINT_EXCHANGE,
};
use grasshopper_control::pi_blaster_driver::{PiBlaster, PiBlasterDriver};
use grasshopper_control::sup800f::switch_to_nmea_mode;
use grasshopper_control::sup800f_telemetry::{
    spawn_calibration_listener, CalibrationHandle, Sup800fTelemetry,
};
use grasshopper_control::telemetry::{
    latitude_longitude_to_point, Telemetry, CENTRAL_LATITUDE, CENTRAL_LONGITUDE,
};
use grasshopper_control::telemetry_message::{CommandMessage, TelemetryReading, WaypointMessage};
use grasshopper_control::waypoint_generator::WaypointGenerator;

const SERIAL_DEVICE: &str = "/dev/ttyAMA0";
const DEFAULT_KML_FILE: &str = "paths/solid-state-depot.kml";

/// Heading of the starting line, from observation.
const INITIAL_HEADING_D: f64 = 315.0;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn main() {
    let options = match handle_opts() {
        Some(options) => options,
        None => return,
    };
    info!("Starting up");

    let handler = handle_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }

    let video = start_video(&options);

    let kml_file_name = options
        .opt_str("k")
        .unwrap_or_else(|| DEFAULT_KML_FILE.to_string());
    let waypoints = match kml::waypoints_from_file_name(&kml_file_name) {
        Ok(waypoints) => waypoints,
        Err(err) => {
            error!("Unable to load waypoints from {}: {}", kml_file_name, err);
            exit(1);
        }
    };

    let max_throttle: f32 = options
        .opt_str("max-throttle")
        .map(|value| value.parse().expect("Already validated"))
        .unwrap_or(1.0);

    let mut serial = match open_serial() {
        Ok(serial) => serial,
        Err(err) => {
            error!("Unable to open {}: {}", SERIAL_DEVICE, err);
            exit(1);
        }
    };
    reset_module_to_nmea(&mut serial);

    let telemetry = Arc::new(Mutex::new(Telemetry::new(
        latitude_longitude_to_point(CENTRAL_LATITUDE, CENTRAL_LONGITUDE),
        INITIAL_HEADING_D,
    )));
    let waypoint_generator: Arc<Mutex<Box<dyn WaypointGenerator>>> =
        Arc::new(Mutex::new(Box::new(ChaseWaypointGenerator::new(waypoints))));

    let pwm = match PiBlaster::new() {
        Ok(pwm) => pwm,
        Err(err) => {
            error!("Unable to open pi-blaster device: {}", err);
            exit(1);
        }
    };
    let mut driver = PiBlasterDriver::new(pwm, telemetry.clone());
    driver.set_max_throttle(max_throttle);

    let stop = Arc::new(AtomicBool::new(false));
    let calibration = Arc::new(CalibrationHandle::new());
    let (command_tx, command_rx) = channel();

    let mut join_handles = Vec::new();
    join_handles.push(spawn_telemetry_consumer(telemetry.clone()));
    join_handles.push(spawn_command_consumer(command_tx));
    join_handles.push(spawn_waypoint_consumer(waypoint_generator.clone()));
    join_handles.push(spawn_calibration_listener(calibration.clone()));

    {
        let mut worker = Sup800fTelemetry::new(serial, calibration);
        let stop = stop.clone();
        join_handles.push(spawn(move || worker.run(&stop)));
    }
    {
        let mut command = Command::new(telemetry, waypoint_generator, Box::new(driver));
        let stop = stop.clone();
        join_handles.push(spawn(move || command.run(command_rx, &stop)));
    }
    #[cfg(target_os = "linux")]
    {
        let stop = stop.clone();
        join_handles.push(spawn(move || Button::new().run(&stop)));
    }
    info!("Started all threads");

    while RUNNING.load(Ordering::Relaxed) {
        sleep(Duration::from_millis(100));
    }

    info!("Received signal, shutting down");
    stop.store(true, Ordering::Relaxed);
    for exchange in [
        COMMAND_EXCHANGE,
        COMMAND_FORWARDED_EXCHANGE,
        TELEMETRY_EXCHANGE,
        WAYPOINT_EXCHANGE,
        LOGS_EXCHANGE,
    ]
    .iter()
    {
        message_bus::quit(exchange);
    }

    if let Some(mut child) = video {
        info!("Killing video capture");
        match child.kill() {
            Ok(_) => (),
            Err(err) => warn!("Unable to kill video capture: {}", err),
        }
    }

    for handle in join_handles {
        match handle.join() {
            Ok(_) => (),
            Err(_) => error!("Unable to join thread, child thread panicked"),
        }
    }

    info!("Main thread shutting down");
}

fn open_serial() -> serialport::Result<Box<dyn SerialPort>> {
    let settings = SerialPortSettings {
        baud_rate: 115200,
        data_bits: DataBits::Eight,
        flow_control: FlowControl::None,
        parity: Parity::None,
        stop_bits: StopBits::One,
        timeout: Duration::from_secs(1),
    };
    serialport::open_with_settings(SERIAL_DEVICE, &settings)
}

/**
 * Forces the module into NMEA mode so the worker starts from a known state.
 * The module might be mid-frame, so drain some data around the switch.
 */
fn reset_module_to_nmea(serial: &mut Box<dyn SerialPort>) {
    info!("Setting SUP800F to NMEA mode");
    drain_lines(serial, 10);
    if let Err(err) = switch_to_nmea_mode(serial) {
        error!("Unable to set mode: {}", err);
    }
    drain_lines(serial, 10);
    info!("Done setting mode");
}

fn drain_lines(serial: &mut Box<dyn SerialPort>, count: u32) {
    let mut byte = [0u8; 1];
    for _ in 0..count {
        // Read until a line ending or time out
        for _ in 0..1024 {
            match serial.read_exact(&mut byte) {
                Ok(()) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

fn start_video(options: &Matches) -> Option<Child> {
    let video_file_name = options.opt_str("video")?;
    match std::process::Command::new("raspivid")
        .args(&[
            "-o",
            &video_file_name,
            "-w",
            "1024",
            "-h",
            "576",
            "-b",
            "6000000",
            "-t",
            "300000",
        ])
        .spawn()
    {
        Ok(child) => Some(child),
        Err(err) => {
            warn!("Unable to save video: {}", err);
            None
        }
    }
}

fn spawn_telemetry_consumer(telemetry: Arc<Mutex<Telemetry>>) -> JoinHandle<()> {
    spawn(move || {
        consume_messages(TELEMETRY_EXCHANGE, |message| {
            match serde_json::from_str::<TelemetryReading>(message) {
                Ok(reading) => match telemetry.lock() {
                    Ok(mut telemetry) => telemetry.handle_message(&reading),
                    Err(_) => error!("Telemetry mutex poisoned"),
                },
                Err(err) => warn!("Unparseable telemetry message: {}", err),
            }
        });
        info!("Telemetry consumer shutting down");
    })
}

fn spawn_command_consumer(command_tx: Sender<CommandMessage>) -> JoinHandle<()> {
    spawn(move || {
        consume_messages(COMMAND_EXCHANGE, |message| {
            info!("Received command message \"{}\"", message);
            match CommandMessage::parse(message) {
                Some(command) => {
                    if command_tx.send(command).is_err() {
                        error!("Unable to forward command, command loop gone");
                    }
                }
                None => warn!("Unknown command message \"{}\"", message),
            }
        });
        info!("Command consumer shutting down");
    })
}

fn spawn_waypoint_consumer(
    waypoint_generator: Arc<Mutex<Box<dyn WaypointGenerator>>>,
) -> JoinHandle<()> {
    spawn(move || {
        consume_messages(WAYPOINT_EXCHANGE, |message| {
            let parsed: WaypointMessage = match serde_json::from_str(message) {
                Ok(parsed) => parsed,
                Err(err) => {
                    error!("Invalid waypoint message {}: {}", message, err);
                    return;
                }
            };
            if parsed.command != "load" {
                error!("Invalid waypoint exchange command: {}", parsed.command);
                return;
            }
            match kml::waypoints_from_file_name(&parsed.file) {
                Ok(waypoints) => match waypoint_generator.lock() {
                    Ok(mut generator) => {
                        generator.set_waypoints(waypoints);
                        info!("Loaded waypoints from {}", parsed.file);
                    }
                    Err(_) => error!("Waypoint generator mutex poisoned"),
                },
                Err(err) => {
                    error!("Unable to load waypoints from {}: {}", parsed.file, err)
                }
            }
        });
        info!("Waypoint consumer shutting down");
    })
}

fn handle_opts() -> Option<Matches> {
    let mut opts = Options::new();
    opts.optflag("v", "verbose", "Prints extra logging.");
    opts.optflag("h", "help", "Print this help menu.");
    opts.optopt("l", "log", "The file to log to.", "FILE");
    opts.optopt("k", "kml", "The KML file from which to load waypoints.", "FILE");
    opts.optopt(
        "",
        "max-throttle",
        "Maximum throttle to drive at (defaults to 1.0)",
        "THROTTLE",
    );
    opts.optopt("", "video", "The video file name.", "FILE");

    let mut args = std::env::args();
    args.next(); // Skip the program name
    let matches = match opts.parse(args) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("Unable to parse options: {}", err);
            exit(1);
        }
    };
    if matches.opt_present("h") {
        print_usage(&opts);
        return None;
    }

    let level = if matches.opt_present("v") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_file_name = matches.opt_str("l").unwrap_or_else(|| {
        chrono::Utc::now()
            .format("log/%Y-%m-%d-%H-%M-grasshopper.log")
            .to_string()
    });
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(LevelFilter::Warn, Config::default()).unwrap(),
        BusLogger::new(level),
    ];
    match std::fs::File::create(&log_file_name) {
        Ok(file) => loggers.push(WriteLogger::new(level, Config::default(), file)),
        Err(_) => eprintln!("Unable to open log file {}", log_file_name),
    }
    CombinedLogger::init(loggers).unwrap();

    if let Some(throttle_str) = matches.opt_str("max-throttle") {
        let throttle: f32 = match throttle_str.parse() {
            Ok(value) => value,
            Err(_) => {
                error!("Invalid throttle, should be between 0.25 and 1.0");
                exit(1);
            }
        };
        if !(0.25..=1.0).contains(&throttle) {
            error!("Invalid throttle, should be between 0.25 and 1.0");
            exit(1);
        }
    }

    Some(matches)
}

fn print_usage(opts: &Options) {
    let brief = "Usage: grasshopper-control [options]";
    print!("{}", opts.usage(brief));
}
