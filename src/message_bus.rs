//! In-process message bus. Producers publish datagrams to named exchanges
//! and any number of consumers receive them, each on its own thread.
use std::collections::HashMap;
use std::str::from_utf8;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, OnceLock};

pub const COMMAND_EXCHANGE: &str = "command";
pub const COMMAND_FORWARDED_EXCHANGE: &str = "command-forwarded";
pub const TELEMETRY_EXCHANGE: &str = "telemetry";
pub const WAYPOINT_EXCHANGE: &str = "waypoint";
pub const LOGS_EXCHANGE: &str = "logs";

/// Sentinel datagram that terminates consumers.
const QUIT: &[u8] = b"QUIT";

type Registry = Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/**
 * Publishes a message to every consumer currently registered on an exchange.
 * Publishing to an exchange with no consumers is a no-op, and never blocks.
 */
pub fn publish(exchange: &str, message: &str) {
    publish_bytes(exchange, message.as_bytes());
}

fn publish_bytes(exchange: &str, datagram: &[u8]) {
    let mut map = registry().lock().expect("Bus registry poisoned");
    if let Some(senders) = map.get_mut(exchange) {
        // Consumers that have gone away are dropped from the exchange
        senders.retain(|sender| sender.send(datagram.to_vec()).is_ok());
    }
}

/**
 * Wakes every consumer of an exchange and terminates it.
 */
pub fn quit(exchange: &str) {
    publish_bytes(exchange, QUIT);
}

fn register(exchange: &str) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel();
    let mut map = registry().lock().expect("Bus registry poisoned");
    map.entry(exchange.to_string()).or_insert_with(Vec::new).push(tx);
    rx
}

/**
 * Consumes messages from an exchange, invoking the callback once per
 * message, in publish order. Blocks until a QUIT sentinel arrives. Run this
 * on a dedicated thread.
 */
pub fn consume_messages<F: FnMut(&str)>(exchange: &str, mut callback: F) {
    let receiver = register(exchange);
    while let Ok(datagram) = receiver.recv() {
        if datagram == QUIT {
            break;
        }
        match from_utf8(&datagram) {
            Ok(message) => callback(message),
            Err(_) => warn!("Non UTF-8 datagram on exchange {}", exchange),
        }
    }
}

/**
 * Publishes messages to a single exchange.
 */
pub struct MessageProducer {
    exchange: String,
}

impl MessageProducer {
    pub fn new(exchange: &str) -> MessageProducer {
        MessageProducer {
            exchange: exchange.to_string(),
        }
    }

    pub fn publish(&self, message: &str) {
        publish(&self.exchange, message);
    }

    /**
     * Kills all listening consumers of this producer's exchange.
     */
    pub fn kill(&self) {
        quit(&self.exchange);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::thread::spawn;

    use super::{consume_messages, publish, quit, MessageProducer};

    // The registry is process wide, so each test uses its own exchange

    #[test]
    fn test_publish_no_consumers() {
        // Must not panic or block
        publish("test-empty", "anyone there?");
    }

    #[test]
    fn test_publish_consume_in_order() {
        let (tx, rx) = channel();
        let handle = spawn(move || {
            let mut count = 0;
            consume_messages("test-order", |message| {
                tx.send(message.to_string()).unwrap();
                count += 1;
            });
            count
        });

        // Wait for the consumer to register
        while !super::registry()
            .lock()
            .unwrap()
            .contains_key("test-order")
        {
            std::thread::yield_now();
        }

        for index in 0..10 {
            publish("test-order", &format!("message-{}", index));
        }
        quit("test-order");

        assert_eq!(handle.join().unwrap(), 10);
        for index in 0..10 {
            assert_eq!(rx.recv().unwrap(), format!("message-{}", index));
        }
    }

    #[test]
    fn test_multiple_consumers_each_receive() {
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(spawn(move || {
                let mut received = Vec::new();
                consume_messages("test-fanout", |message| received.push(message.to_string()));
                received
            }));
        }

        while super::registry()
            .lock()
            .unwrap()
            .get("test-fanout")
            .map(|senders| senders.len())
            .unwrap_or(0)
            < 3
        {
            std::thread::yield_now();
        }

        publish("test-fanout", "calibrate-compass");
        quit("test-fanout");

        for handle in handles {
            let received = handle.join().unwrap();
            assert_eq!(received, vec!["calibrate-compass".to_string()]);
        }
    }

    #[test]
    fn test_publish_after_consumer_gone() {
        let handle = spawn(move || consume_messages("test-gone", |_| ()));
        while !super::registry().lock().unwrap().contains_key("test-gone") {
            std::thread::yield_now();
        }
        quit("test-gone");
        handle.join().unwrap();
        // The consumer has exited; this must not block
        publish("test-gone", "too late");
    }

    #[test]
    fn test_message_producer() {
        let producer = MessageProducer::new("test-producer");
        let handle = spawn(move || {
            let mut received = Vec::new();
            consume_messages("test-producer", |message| received.push(message.to_string()));
            received
        });
        while !super::registry()
            .lock()
            .unwrap()
            .contains_key("test-producer")
        {
            std::thread::yield_now();
        }
        producer.publish("start");
        producer.kill();
        assert_eq!(handle.join().unwrap(), vec!["start".to_string()]);
    }
}
