//! Hardware backends
//!
//! The `rpi` feature selects the rppal backend; without it the in-memory
//! mock backend is the only one available, which is enough for development
//! and tests off the appliance.

pub mod mock;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod traits;

pub use traits::{DigitalInput, DigitalOutput, IrqListener, Level, SpiBus};
