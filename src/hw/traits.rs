//! Hardware access traits
//!
//! Everything that touches a physical pin or the SPI bus goes through these
//! traits, so the rest of the crate runs unmodified against the mock backend
//! on a development machine and against the Raspberry Pi backend on the
//! appliance.

use std::time::Duration;

use crate::domain::Result;
use crate::infra::config::Edge;

/// Logic level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// A readable input pin that can deliver edge callbacks.
pub trait DigitalInput: Send {
    fn read(&self) -> Result<Level>;

    /// Install an edge callback. The callback runs on a backend-owned thread
    /// and must return quickly; implementations hand real work off to an
    /// actor loop.
    fn on_edge(&mut self, edge: Edge, callback: Box<dyn FnMut(Level) + Send>) -> Result<()>;

    /// Remove a previously installed edge callback.
    fn clear_edge(&mut self) -> Result<()>;
}

/// A writable output pin.
pub trait DigitalOutput: Send {
    fn write(&mut self, level: Level) -> Result<()>;
}

/// Blocking wait for a single edge, used by the RFID reader thread to sleep
/// on the reader's IRQ line.
pub trait IrqListener: Send {
    /// Wait until the edge fires or the timeout elapses. Returns true when
    /// the edge was seen.
    fn wait_edge(&mut self, edge: Edge, timeout: Duration) -> Result<bool>;
}

/// Full-duplex SPI transfers against a single chip-select.
pub trait SpiBus: Send {
    /// Transfer `write` out while clocking the same number of bytes into
    /// `read`. Both slices have the same length.
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<()>;
}
