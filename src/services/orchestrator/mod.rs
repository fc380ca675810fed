//! Central control loop
//!
//! Everything that happens on the appliance funnels into one event queue:
//! card reader events, transport events, button presses, encoder steps and
//! timer expiries. The orchestrator consumes the queue one event at a time,
//! so handlers never observe each other mid-flight.

mod handlers;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::infra::Config;
use crate::io::led::StatusLed;
use crate::io::reader::ReaderEvent;
use crate::io::transport::{Transport, TransportEvent};
use crate::io::Rotation;
use crate::services::sound::Synthesizer;
use crate::services::system::System;

#[derive(Debug, Clone)]
pub enum ControlEvent {
    Reader(ReaderEvent),
    Transport(TransportEvent),
    PlayPausePressed,
    RewindPressed,
    ForwardPressed,
    VolumeStep(Rotation),
    ShutdownRequested,
    ReadyPromptDue,
    BrowserCheckDue,
    StatusRecheckDue,
    ReadoutRetryDue { text: String, attempts: u32 },
}

pub type EventSender = mpsc::UnboundedSender<ControlEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ControlEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What the orchestrator believes about the browser player.
#[derive(Debug, Clone, Default)]
struct PlayerState {
    paused: bool,
    network_error: bool,
    running: bool,
    current_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Ready,
    BrowserCheck,
    StatusRecheck,
    ReadoutRetry,
}

/// Named one-shot timers feeding back into the event queue. Setting a key
/// replaces any timer already running under it.
struct Timers {
    tx: EventSender,
    handles: HashMap<TimerKey, JoinHandle<()>>,
}

impl Timers {
    fn new(tx: EventSender) -> Self {
        Self { tx, handles: HashMap::new() }
    }

    fn set(&mut self, key: TimerKey, delay: Duration, event: ControlEvent) {
        self.cancel(key);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        self.handles.insert(key, handle);
    }

    fn cancel(&mut self, key: TimerKey) {
        if let Some(handle) = self.handles.remove(&key) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

/// Blink while running but paused.
fn paused_pattern() -> Vec<Duration> {
    vec![Duration::from_millis(750), Duration::from_millis(1500)]
}

/// Double blink with a long gap while the player reports network trouble.
fn error_pattern() -> Vec<Duration> {
    [250u64, 500, 250, 500, 1500, 500].into_iter().map(Duration::from_millis).collect()
}

pub struct Orchestrator {
    config: Config,
    transport: Arc<Transport>,
    led: StatusLed,
    synth: Arc<dyn Synthesizer>,
    system: Arc<System>,
    state: PlayerState,
    timers: Timers,
    shutdown: watch::Sender<bool>,
    peer_notified_shutdown: bool,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        transport: Arc<Transport>,
        led: StatusLed,
        synth: Arc<dyn Synthesizer>,
        system: Arc<System>,
        events: EventSender,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            config,
            transport,
            led,
            synth,
            system,
            state: PlayerState::default(),
            timers: Timers::new(events),
            shutdown,
            peer_notified_shutdown: false,
        }
    }

    /// Consume events until shutdown is signalled or the queue closes.
    pub async fn run(mut self, mut events: EventReceiver) {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.startup();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                }
            }
        }
        self.finish().await;
        info!(event = "orchestrator_stopped");
    }

    fn startup(&mut self) {
        info!(event = "orchestrator_started");
        self.prompt("startup");
        // blink slowly until the frontend shows up
        self.led.start_pattern(paused_pattern(), Some(false));
        if self.config.browser_check_secs() > 0.0 {
            self.timers.set(
                TimerKey::BrowserCheck,
                Duration::from_secs_f64(self.config.browser_check_secs()),
                ControlEvent::BrowserCheckDue,
            );
        }
    }

    async fn finish(&mut self) {
        self.timers.cancel_all();
        self.synth.stop_playback();
        if !self.peer_notified_shutdown && self.transport.has_peer() {
            let _ = self.transport.send(crate::domain::Command::Shutdown).await;
        }
        debug!(event = "orchestrator_finished");
    }
}
