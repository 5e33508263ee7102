#[macro_use]
extern crate log;
#[macro_use]
extern crate enum_primitive;

pub mod bus_logger;
#[cfg(target_os = "linux")]
pub mod button;
pub mod chase_waypoint_generator;
pub mod command;
pub mod driver;
pub mod estimated_compass;
pub mod extension_waypoint_generator;
pub mod heading_filter;
pub mod kml;
pub mod location_filter;
pub mod message_bus;
pub mod nmea;
pub mod pi_blaster_driver;
pub mod producers;
pub mod simple_waypoint_generator;
pub mod sup800f;
pub mod sup800f_telemetry;
pub mod telemetry;
pub mod telemetry_message;
pub mod waypoint_generator;
