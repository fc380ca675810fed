//! Status LED with blink patterns
//!
//! All pin writes run on the LED actor loop, so a steady set() and a
//! running blink pattern can never interleave writes. Starting a pattern or
//! setting a steady level cancels whatever pattern was running.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::hw::{DigitalOutput, Level};
use crate::infra::ActorLoop;

#[derive(Clone)]
pub struct StatusLed {
    actor: ActorLoop,
    pin: Arc<Mutex<Box<dyn DigitalOutput>>>,
    active: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl StatusLed {
    pub fn new(pin: Box<dyn DigitalOutput>, actor: ActorLoop) -> Self {
        Self { actor, pin: Arc::new(Mutex::new(pin)), active: Arc::new(Mutex::new(None)) }
    }

    fn write(pin: &Arc<Mutex<Box<dyn DigitalOutput>>>, on: bool) {
        let level = if on { Level::High } else { Level::Low };
        if let Err(e) = pin.lock().write(level) {
            warn!(event = "led_write_failed", error = %e);
        }
    }

    fn cancel_pattern(&self) {
        if let Some(cancel) = self.active.lock().take() {
            let _ = cancel.send(true);
        }
    }

    /// Cancel any pattern and hold the LED at a steady level.
    pub fn set(&self, on: bool) {
        self.cancel_pattern();
        let pin = self.pin.clone();
        self.actor.submit(async move {
            Self::write(&pin, on);
        });
    }

    /// Start a cyclic blink pattern. The LED turns on for `phases[0]`, off
    /// for `phases[1]`, and so on, wrapping around. When the pattern is
    /// cancelled the LED is left at `terminal` if one is given, otherwise
    /// at whatever level the pattern last wrote.
    pub fn start_pattern(&self, phases: Vec<Duration>, terminal: Option<bool>) {
        if phases.is_empty() {
            return;
        }
        self.cancel_pattern();
        let (tx, mut rx) = watch::channel(false);
        *self.active.lock() = Some(tx);

        let pin = self.pin.clone();
        self.actor.submit(async move {
            let mut on = false;
            loop {
                for &phase in &phases {
                    on = !on;
                    Self::write(&pin, on);
                    tokio::select! {
                        _ = tokio::time::sleep(phase) => {}
                        _ = rx.changed() => {
                            if let Some(level) = terminal {
                                Self::write(&pin, level);
                            }
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Cancel the running pattern, leaving its terminal level applied.
    pub fn stop_pattern(&self) {
        self.cancel_pattern();
    }

    /// Cancel everything and turn the LED off. Called before the LED actor
    /// loop is drained at shutdown.
    pub fn shutdown(&self) {
        self.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockOutput;

    #[test]
    fn test_set_writes_level() {
        let actor = ActorLoop::spawn("led-set");
        let pin = MockOutput::new();
        let led = StatusLed::new(Box::new(pin.clone()), actor.clone());
        led.set(true);
        led.set(false);
        actor.stop();
        assert_eq!(pin.writes(), vec![Level::High, Level::Low]);
    }

    #[test]
    fn test_pattern_toggles_and_applies_terminal() {
        let actor = ActorLoop::spawn("led-pattern");
        let pin = MockOutput::new();
        let led = StatusLed::new(Box::new(pin.clone()), actor.clone());
        led.start_pattern(
            vec![Duration::from_millis(20), Duration::from_millis(20)],
            Some(true),
        );
        std::thread::sleep(Duration::from_millis(70));
        led.stop_pattern();
        actor.stop();

        let writes = pin.writes();
        assert!(writes.len() >= 3);
        assert_eq!(writes[0], Level::High);
        assert_eq!(writes[1], Level::Low);
        assert_eq!(*writes.last().unwrap(), Level::High);
    }

    #[test]
    fn test_set_cancels_running_pattern() {
        let actor = ActorLoop::spawn("led-cancel");
        let pin = MockOutput::new();
        let led = StatusLed::new(Box::new(pin.clone()), actor.clone());
        led.start_pattern(vec![Duration::from_secs(60)], None);
        std::thread::sleep(Duration::from_millis(20));
        led.set(false);
        actor.stop();
        assert_eq!(pin.last(), Some(Level::Low));
    }
}
