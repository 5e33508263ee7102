//! Forwards log records onto the message bus so monitoring collaborators
//! can subscribe to them. Plugs into the same `CombinedLogger` as the
//! terminal and file loggers.
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::json;
use simplelog::{Config, SharedLogger};

use crate::message_bus::{publish, LOGS_EXCHANGE};

pub struct BusLogger {
    level: LevelFilter,
}

impl BusLogger {
    pub fn new(level: LevelFilter) -> Box<BusLogger> {
        Box::new(BusLogger { level })
    }
}

impl Log for BusLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug | Level::Trace => "debug",
        };
        publish(
            LOGS_EXCHANGE,
            &json!({
                "level": level,
                "message": format!("{}", record.args()),
            })
            .to_string(),
        );
    }

    fn flush(&self) {}
}

impl SharedLogger for BusLogger {
    fn level(&self) -> LevelFilter {
        self.level
    }

    fn config(&self) -> Option<&Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::thread::spawn;

    use log::{Level, LevelFilter, Log, Record};

    use super::BusLogger;
    use crate::message_bus::{consume_messages, quit, LOGS_EXCHANGE};
    use crate::telemetry_message::LogRecord;

    #[test]
    fn test_log_record_published_as_json() {
        let handle = spawn(move || {
            let mut records = Vec::new();
            consume_messages(LOGS_EXCHANGE, |message| {
                records.push(serde_json::from_str::<LogRecord>(message).unwrap());
            });
            records
        });
        std::thread::sleep(std::time::Duration::from_millis(50));

        let logger = BusLogger::new(LevelFilter::Info);
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("waypoint 3 unreachable"))
                .build(),
        );
        // Filtered out by level
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("noisy"))
                .build(),
        );
        quit(LOGS_EXCHANGE);

        let records = handle.join().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, "warn");
        assert_eq!(records[0].message, "waypoint 3 unreachable");
    }
}
