//! Canonical payload types that flow over the message bus.
use serde::{Deserialize, Serialize};

/// A GPS fix. Heading and speed may be missing from some sources.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GpsReading {
    pub latitude_d: f64,
    pub longitude_d: f64,
    pub accuracy_m: f64,
    pub heading_d: Option<f64>,
    pub speed_m_s: Option<f64>,
    pub timestamp_s: f64,
    pub device_id: String,
}

/// A compass heading with a confidence in [0, 1].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CompassReading {
    pub compass_d: f64,
    pub confidence: f64,
    pub device_id: String,
}

/// An accelerometer reading in g.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AccelerometerReading {
    pub acceleration_g_x: f32,
    pub acceleration_g_y: f32,
    pub acceleration_g_z: f32,
    pub device_id: String,
}

/// Any reading that appears on the telemetry exchange. The JSON shapes are
/// distinct, so the variants are distinguished by their fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryReading {
    Gps(GpsReading),
    Compass(CompassReading),
    Accelerometer(AccelerometerReading),
}

/// A command verb from the command exchange.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandMessage {
    Start,
    Stop,
    Reset,
    CalibrateCompass,
    SetMaxThrottle(f32),
}

impl CommandMessage {
    /**
     * Parses an ASCII command verb, e.g. "start" or "set-max-throttle=0.5".
     */
    pub fn parse(message: &str) -> Option<CommandMessage> {
        match message {
            "start" => Some(CommandMessage::Start),
            "stop" => Some(CommandMessage::Stop),
            "reset" => Some(CommandMessage::Reset),
            "calibrate-compass" => Some(CommandMessage::CalibrateCompass),
            _ => {
                let prefix = "set-max-throttle=";
                if message.starts_with(prefix) {
                    message[prefix.len()..]
                        .parse()
                        .ok()
                        .map(CommandMessage::SetMaxThrottle)
                } else {
                    None
                }
            }
        }
    }
}

/// A request on the waypoint exchange, e.g. {"command": "load", "file": "x"}.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WaypointMessage {
    pub command: String,
    pub file: String,
}

/// A structured log record for the logs exchange.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::{CommandMessage, GpsReading, TelemetryReading};

    #[test]
    fn test_parse_command() {
        assert_eq!(CommandMessage::parse("start"), Some(CommandMessage::Start));
        assert_eq!(CommandMessage::parse("stop"), Some(CommandMessage::Stop));
        assert_eq!(CommandMessage::parse("reset"), Some(CommandMessage::Reset));
        assert_eq!(
            CommandMessage::parse("calibrate-compass"),
            Some(CommandMessage::CalibrateCompass)
        );
        assert_eq!(
            CommandMessage::parse("set-max-throttle=0.75"),
            Some(CommandMessage::SetMaxThrottle(0.75))
        );
        assert_eq!(CommandMessage::parse("set-max-throttle=abc"), None);
        assert_eq!(CommandMessage::parse("fly"), None);
    }

    #[test]
    fn test_telemetry_reading_json_shapes() {
        let gps = TelemetryReading::Gps(GpsReading {
            latitude_d: 40.0,
            longitude_d: -105.0,
            accuracy_m: 2.5,
            heading_d: Some(90.0),
            speed_m_s: None,
            timestamp_s: 1428064496.789,
            device_id: "sup800f".to_string(),
        });
        let json = serde_json::to_string(&gps).unwrap();
        let parsed: TelemetryReading = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, gps);

        let compass_json = r#"{"compass_d": 123.4, "confidence": 0.5, "device_id": "sup800f"}"#;
        match serde_json::from_str(compass_json).unwrap() {
            TelemetryReading::Compass(compass) => {
                assert_eq!(compass.compass_d, 123.4);
                assert_eq!(compass.confidence, 0.5);
            }
            other => panic!("Parsed as wrong variant: {:?}", other),
        }

        let accelerometer_json = r#"{
            "acceleration_g_x": 0.0,
            "acceleration_g_y": 0.1,
            "acceleration_g_z": -1.0,
            "device_id": "sup800f"
        }"#;
        match serde_json::from_str(accelerometer_json).unwrap() {
            TelemetryReading::Accelerometer(accelerometer) => {
                assert_eq!(accelerometer.acceleration_g_z, -1.0);
            }
            other => panic!("Parsed as wrong variant: {:?}", other),
        }
    }
}
