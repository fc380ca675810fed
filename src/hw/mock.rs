//! In-memory hardware backend
//!
//! Default backend when the `rpi` feature is off. Pins remember their level,
//! edges can be injected from test code, and the SPI bus replays scripted
//! responses. This is what the unit tests and a desktop run of the binary
//! use.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::traits::{DigitalInput, DigitalOutput, IrqListener, Level, SpiBus};
use crate::domain::Result;
use crate::infra::config::Edge;

type EdgeCallback = Box<dyn FnMut(Level) + Send>;

#[derive(Default)]
struct InputState {
    level: Option<Level>,
    callback: Option<(Edge, EdgeCallback)>,
}

/// Mock input pin. [`MockInput::set_level`] changes the level and fires the
/// installed callback when the transition matches the registered edge.
#[derive(Clone)]
pub struct MockInput {
    state: Arc<Mutex<InputState>>,
    idle: Level,
}

impl MockInput {
    pub fn new(idle: Level) -> Self {
        Self { state: Arc::new(Mutex::new(InputState::default())), idle }
    }

    /// Drive the pin to `level`, invoking the edge callback if it matches.
    pub fn set_level(&self, level: Level) {
        let mut state = self.state.lock();
        let previous = state.level.unwrap_or(self.idle);
        state.level = Some(level);
        if previous == level {
            return;
        }
        let fired = match level {
            Level::High => Edge::Rising,
            Level::Low => Edge::Falling,
        };
        if let Some((edge, callback)) = state.callback.as_mut() {
            if *edge == fired {
                callback(level);
            }
        }
    }

    /// Convenience for tests: pulse away from idle and back.
    pub fn pulse(&self) {
        let active = match self.idle {
            Level::High => Level::Low,
            Level::Low => Level::High,
        };
        self.set_level(active);
        self.set_level(self.idle);
    }
}

impl DigitalInput for MockInput {
    fn read(&self) -> Result<Level> {
        Ok(self.state.lock().level.unwrap_or(self.idle))
    }

    fn on_edge(&mut self, edge: Edge, callback: EdgeCallback) -> Result<()> {
        self.state.lock().callback = Some((edge, callback));
        Ok(())
    }

    fn clear_edge(&mut self) -> Result<()> {
        self.state.lock().callback = None;
        Ok(())
    }
}

/// Mock output pin remembering every level written to it.
#[derive(Clone, Default)]
pub struct MockOutput {
    writes: Arc<Mutex<Vec<Level>>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Level> {
        self.writes.lock().last().copied()
    }

    pub fn writes(&self) -> Vec<Level> {
        self.writes.lock().clone()
    }
}

impl DigitalOutput for MockOutput {
    fn write(&mut self, level: Level) -> Result<()> {
        self.writes.lock().push(level);
        Ok(())
    }
}

/// Mock IRQ line. Tests queue edge deliveries; waits consume them in order
/// and time out when the queue is empty.
#[derive(Clone, Default)]
pub struct MockIrq {
    pending: Arc<Mutex<VecDeque<bool>>>,
}

impl MockIrq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one successful edge delivery.
    pub fn fire(&self) {
        self.pending.lock().push_back(true);
    }
}

impl IrqListener for MockIrq {
    fn wait_edge(&mut self, _edge: Edge, timeout: Duration) -> Result<bool> {
        if let Some(fired) = self.pending.lock().pop_front() {
            return Ok(fired);
        }
        // emulate a real line: block for the timeout, then report no edge
        std::thread::sleep(timeout);
        Ok(self.pending.lock().pop_front().unwrap_or(false))
    }
}

/// Mock SPI bus replaying scripted responses. Each transfer pops the next
/// scripted response; an empty script answers with zeros.
#[derive(Clone, Default)]
pub struct MockSpi {
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockSpi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Vec<u8>) {
        self.responses.lock().push_back(response);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl SpiBus for MockSpi {
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<()> {
        self.sent.lock().push(write.to_vec());
        read.fill(0);
        if let Some(response) = self.responses.lock().pop_front() {
            let n = response.len().min(read.len());
            read[..n].copy_from_slice(&response[..n]);
        }
        Ok(())
    }
}
