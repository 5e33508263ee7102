//! Watches the physical start/stop button: one press to start, two within a
//! second to stop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sysfs_gpio::{Direction, Edge, Pin};

use crate::producers::CommandProducer;

const BUTTON_GPIO_PIN: u64 = 24;
const BUTTON_DOWN: u8 = 1;

const DEBOUNCE: Duration = Duration::from_millis(50);
const DOUBLE_PRESS_WINDOW: Duration = Duration::from_secs(1);

/// How long to block waiting for an edge before checking the stop flag.
const POLL_TIMEOUT_MS: isize = 1000;

pub struct Button {
    command: CommandProducer,
    button_press_time: Option<Instant>,
}

impl Button {
    pub fn new() -> Button {
        Button {
            command: CommandProducer::new(),
            button_press_time: None,
        }
    }

    /**
     * Runs in a thread, waiting for button presses.
     */
    pub fn run(&mut self, stop: &AtomicBool) {
        let pin = Pin::new(BUTTON_GPIO_PIN);
        let result = pin.with_exported(|| {
            pin.set_direction(Direction::In)?;
            pin.set_edge(Edge::RisingEdge)?;
            let mut poller = pin.get_poller()?;
            while !stop.load(Ordering::Relaxed) {
                match poller.poll(POLL_TIMEOUT_MS)? {
                    Some(value) if value == BUTTON_DOWN => self.handle_press(Instant::now()),
                    _ => (),
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            error!("Button watcher failed: {}", err);
        }
        info!("Button watcher shutting down");
    }

    /**
     * Handles a single debounced press.
     */
    fn handle_press(&mut self, now: Instant) {
        if let Some(last) = self.button_press_time {
            if now.duration_since(last) < DEBOUNCE {
                return;
            }
        }
        info!("Button pressed: GPIO pin {}", BUTTON_GPIO_PIN);

        // One press to start, two within a second to stop
        match self.button_press_time {
            Some(last) if now.duration_since(last) < DOUBLE_PRESS_WINDOW => self.command.stop(),
            _ => self.command.start(),
        }
        self.button_press_time = Some(now);
    }
}

impl Default for Button {
    fn default() -> Button {
        Button::new()
    }
}
