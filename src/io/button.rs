//! Debounced GPIO push buttons
//!
//! Edge callbacks arrive on a backend thread and must not block, so each
//! press is handed to the input actor loop as a task. A per-button busy
//! flag drops presses that arrive while the previous handler is still
//! running instead of queueing them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::Result;
use crate::hw::{DigitalInput, Level};
use crate::infra::config::{ButtonPinConfig, Edge};
use crate::infra::ActorLoop;

/// Releases the busy flag when the handler task finishes, including when the
/// task is dropped by a stopping actor loop.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GpioButton {
    input: Arc<Mutex<Box<dyn DigitalInput>>>,
    name: &'static str,
}

impl GpioButton {
    /// Bind a press handler. Each accepted press runs `handler` to
    /// completion on `actor` before the next press is accepted.
    pub fn bind<H, F>(
        input: Box<dyn DigitalInput>,
        name: &'static str,
        cfg: &ButtonPinConfig,
        actor: &ActorLoop,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        Self::bind_inner(Arc::new(Mutex::new(input)), name, cfg, actor, handler)
    }

    /// Bind a hold handler: the press only counts when the pin stays at its
    /// active level for `hold` without interruption. Used for the shutdown
    /// button so a bump does not power the appliance off.
    pub fn bind_hold<H, F>(
        input: Box<dyn DigitalInput>,
        name: &'static str,
        cfg: &ButtonPinConfig,
        hold: Duration,
        actor: &ActorLoop,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let active = match cfg.edge {
            Edge::Falling => Level::Low,
            Edge::Rising => Level::High,
        };
        let shared = Arc::new(Mutex::new(input));
        let pin = shared.clone();
        let handler = Arc::new(handler);

        Self::bind_inner(shared.clone(), name, cfg, actor, move || {
            let pin = pin.clone();
            let handler = handler.clone();
            async move {
                let deadline = Instant::now() + hold;
                while Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let level = pin.lock().read();
                    match level {
                        Ok(level) if level == active => {}
                        _ => {
                            debug!(event = "button_hold_released", button = name);
                            return;
                        }
                    }
                }
                info!(event = "button_held", button = name);
                handler().await;
            }
        })
    }

    fn bind_inner<H, F>(
        input: Arc<Mutex<Box<dyn DigitalInput>>>,
        name: &'static str,
        cfg: &ButtonPinConfig,
        actor: &ActorLoop,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let busy = Arc::new(AtomicBool::new(false));
        let debounce = Duration::from_millis(cfg.debounce_ms);
        let last_press: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let actor = actor.clone();

        input.lock().on_edge(
            cfg.edge,
            Box::new(move |_level| {
                let now = Instant::now();
                {
                    let mut last = last_press.lock();
                    if let Some(prev) = *last {
                        if now.duration_since(prev) < debounce {
                            return;
                        }
                    }
                    *last = Some(now);
                }
                if busy
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(event = "button_ignored_busy", button = name);
                    return;
                }
                info!(event = "button_pressed", button = name);
                let guard = BusyGuard(busy.clone());
                let task = handler();
                actor.submit(async move {
                    let _guard = guard;
                    task.await;
                });
            }),
        )?;

        Ok(Self { input, name })
    }

    /// Detach the edge callback. After this returns no further presses are
    /// delivered.
    pub fn release(&mut self) -> Result<()> {
        debug!(event = "button_released", button = self.name);
        self.input.lock().clear_edge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockInput;
    use std::sync::atomic::AtomicUsize;

    fn fast_cfg() -> ButtonPinConfig {
        ButtonPinConfig { pin: 16, debounce_ms: 0, edge: Edge::Falling, pullup: true }
    }

    fn wait_for_count(count: &AtomicUsize, expected: usize) {
        for _ in 0..400 {
            if count.load(Ordering::SeqCst) >= expected {
                // let the busy flag clear after the handler returns
                std::thread::sleep(Duration::from_millis(5));
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("handler did not run");
    }

    #[test]
    fn test_press_runs_handler() {
        let actor = ActorLoop::spawn("btn-test");
        let pin = MockInput::new(Level::High);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _button = GpioButton::bind(
            Box::new(pin.clone()),
            "play_pause",
            &fast_cfg(),
            &actor,
            move || {
                let count = count2.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        pin.pulse();
        wait_for_count(&count, 1);
        pin.pulse();
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debounce_swallows_rapid_presses() {
        let actor = ActorLoop::spawn("btn-debounce");
        let pin = MockInput::new(Level::High);
        let cfg = ButtonPinConfig { debounce_ms: 10_000, ..fast_cfg() };
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _button = GpioButton::bind(
            Box::new(pin.clone()),
            "rewind",
            &cfg,
            &actor,
            move || {
                let count = count2.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        pin.pulse();
        pin.pulse();
        pin.pulse();
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_flag_drops_overlapping_press() {
        let actor = ActorLoop::spawn("btn-busy");
        let pin = MockInput::new(Level::High);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let _button = GpioButton::bind(
            Box::new(pin.clone()),
            "forward",
            &fast_cfg(),
            &actor,
            move || {
                let count = count2.clone();
                let gate = gate_rx.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.lock().recv();
                }
            },
        )
        .unwrap();

        pin.pulse();
        // handler is parked on the gate, this press must be dropped
        pin.pulse();
        gate_tx.send(()).unwrap();
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hold_requires_sustained_press() {
        let actor = ActorLoop::spawn("btn-hold");
        let pin = MockInput::new(Level::High);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _button = GpioButton::bind_hold(
            Box::new(pin.clone()),
            "shutdown",
            &fast_cfg(),
            Duration::from_millis(150),
            &actor,
            move || {
                let count = count2.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        // released before the hold elapses, must not fire
        pin.set_level(Level::Low);
        std::thread::sleep(Duration::from_millis(30));
        pin.set_level(Level::High);
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // held long enough
        pin.set_level(Level::Low);
        std::thread::sleep(Duration::from_millis(300));
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_detaches_callback() {
        let actor = ActorLoop::spawn("btn-release");
        let pin = MockInput::new(Level::High);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let mut button = GpioButton::bind(
            Box::new(pin.clone()),
            "play_pause",
            &fast_cfg(),
            &actor,
            move || {
                let count = count2.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        button.release().unwrap();
        pin.pulse();
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
