//! Rotary encoder input for volume control
//!
//! Classic two-line quadrature decode: on the falling edge of the clock
//! line the data line tells the rotation direction. Steps are handed to the
//! input actor loop one at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::Result;
use crate::hw::DigitalInput;
use crate::infra::config::Edge;
use crate::infra::ActorLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

pub struct GpioRotaryEncoder {
    clk: Box<dyn DigitalInput>,
    // kept alive so the data line stays claimed while the callback reads it
    _dt: Arc<Mutex<Box<dyn DigitalInput>>>,
}

impl GpioRotaryEncoder {
    /// Bind a step handler. `handler` runs on `actor` once per detent.
    pub fn bind<H, F>(
        mut clk: Box<dyn DigitalInput>,
        dt: Box<dyn DigitalInput>,
        actor: &ActorLoop,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn(Rotation) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let dt = Arc::new(Mutex::new(dt));
        let dt_cb = dt.clone();
        let actor = actor.clone();
        // contact settle guard between detents
        let last_step: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        clk.on_edge(
            Edge::Falling,
            Box::new(move |_level| {
                let now = Instant::now();
                {
                    let mut last = last_step.lock();
                    if let Some(prev) = *last {
                        if now.duration_since(prev) < Duration::from_millis(2) {
                            return;
                        }
                    }
                    *last = Some(now);
                }
                let rotation = match dt_cb.lock().read() {
                    Ok(level) if level.is_high() => Rotation::Clockwise,
                    Ok(_) => Rotation::CounterClockwise,
                    Err(e) => {
                        debug!(event = "encoder_read_failed", error = %e);
                        return;
                    }
                };
                actor.submit(handler(rotation));
            }),
        )?;

        Ok(Self { clk, _dt: dt })
    }

    pub fn release(&mut self) -> Result<()> {
        self.clk.clear_edge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockInput;
    use crate::hw::Level;

    #[test]
    fn test_direction_follows_data_line() {
        let actor = ActorLoop::spawn("enc-test");
        let clk = MockInput::new(Level::High);
        let dt = MockInput::new(Level::High);
        let steps = Arc::new(Mutex::new(Vec::new()));
        let steps2 = steps.clone();
        let _encoder = GpioRotaryEncoder::bind(
            Box::new(clk.clone()),
            Box::new(dt.clone()),
            &actor,
            move |rotation| {
                let steps = steps2.clone();
                async move {
                    steps.lock().push(rotation);
                }
            },
        )
        .unwrap();

        // dt high at clk falling edge -> clockwise
        dt.set_level(Level::High);
        clk.set_level(Level::Low);
        clk.set_level(Level::High);
        std::thread::sleep(Duration::from_millis(5));

        // dt low -> counter-clockwise
        dt.set_level(Level::Low);
        clk.set_level(Level::Low);
        actor.stop();

        assert_eq!(*steps.lock(), vec![Rotation::Clockwise, Rotation::CounterClockwise]);
    }
}
