//! Typed producers for the message bus exchanges.
use serde_json::json;

use crate::message_bus::{
    MessageProducer, COMMAND_EXCHANGE, COMMAND_FORWARDED_EXCHANGE, TELEMETRY_EXCHANGE,
    WAYPOINT_EXCHANGE,
};

/**
 * Forwards commands.
 */
pub struct CommandProducer {
    producer: MessageProducer,
}

impl CommandProducer {
    pub fn new() -> CommandProducer {
        CommandProducer {
            producer: MessageProducer::new(COMMAND_EXCHANGE),
        }
    }

    pub fn start(&self) {
        self.producer.publish("start");
    }

    pub fn stop(&self) {
        self.producer.publish("stop");
    }

    pub fn reset(&self) {
        self.producer.publish("reset");
    }

    pub fn calibrate_compass(&self) {
        self.producer.publish("calibrate-compass");
    }

    pub fn set_max_throttle(&self, throttle: f32) {
        self.producer.publish(&format!("set-max-throttle={}", throttle));
    }
}

impl Default for CommandProducer {
    fn default() -> CommandProducer {
        CommandProducer::new()
    }
}

/**
 * Forwards command messages to the exchange the sensor worker listens on.
 */
pub struct CommandForwardProducer {
    producer: MessageProducer,
}

impl CommandForwardProducer {
    pub fn new() -> CommandForwardProducer {
        CommandForwardProducer {
            producer: MessageProducer::new(COMMAND_FORWARDED_EXCHANGE),
        }
    }

    pub fn forward(&self, message: &str) {
        self.producer.publish(message);
    }
}

impl Default for CommandForwardProducer {
    fn default() -> CommandForwardProducer {
        CommandForwardProducer::new()
    }
}

/**
 * Forwards canonical sensor readings.
 */
pub struct TelemetryProducer {
    producer: MessageProducer,
}

impl TelemetryProducer {
    pub fn new() -> TelemetryProducer {
        TelemetryProducer {
            producer: MessageProducer::new(TELEMETRY_EXCHANGE),
        }
    }

    pub fn gps_reading(
        &self,
        latitude_d: f64,
        longitude_d: f64,
        accuracy_m: f64,
        heading_d: f64,
        speed_m_s: f64,
        timestamp_s: f64,
        device_id: &str,
    ) {
        self.producer.publish(
            &json!({
                "latitude_d": latitude_d,
                "longitude_d": longitude_d,
                "accuracy_m": accuracy_m,
                "heading_d": heading_d,
                "speed_m_s": speed_m_s,
                "timestamp_s": timestamp_s,
                "device_id": device_id,
            })
            .to_string(),
        );
    }

    pub fn compass_reading(&self, compass_d: f64, confidence: f64, device_id: &str) {
        self.producer.publish(
            &json!({
                "compass_d": compass_d,
                "confidence": confidence,
                "device_id": device_id,
            })
            .to_string(),
        );
    }

    pub fn accelerometer_reading(
        &self,
        acceleration_g_x: f32,
        acceleration_g_y: f32,
        acceleration_g_z: f32,
        device_id: &str,
    ) {
        self.producer.publish(
            &json!({
                "acceleration_g_x": acceleration_g_x,
                "acceleration_g_y": acceleration_g_y,
                "acceleration_g_z": acceleration_g_z,
                "device_id": device_id,
            })
            .to_string(),
        );
    }
}

impl Default for TelemetryProducer {
    fn default() -> TelemetryProducer {
        TelemetryProducer::new()
    }
}

/**
 * Forwards waypoint load requests.
 */
pub struct WaypointProducer {
    producer: MessageProducer,
}

impl WaypointProducer {
    pub fn new() -> WaypointProducer {
        WaypointProducer {
            producer: MessageProducer::new(WAYPOINT_EXCHANGE),
        }
    }

    pub fn load_kml_file(&self, kml_file_name: &str) {
        self.producer.publish(
            &json!({
                "command": "load",
                "file": kml_file_name,
            })
            .to_string(),
        );
    }
}

impl Default for WaypointProducer {
    fn default() -> WaypointProducer {
        WaypointProducer::new()
    }
}
