//! Device and network endpoints

pub mod button;
pub mod encoder;
pub mod fileserver;
pub mod led;
pub mod rc522;
pub mod reader;
pub mod transport;

pub use button::GpioButton;
pub use encoder::{GpioRotaryEncoder, Rotation};
pub use led::StatusLed;
pub use rc522::{Rc522, TagReader};
pub use reader::{ReaderEvent, RfidReader};
pub use transport::{Transport, TransportEvent};
