//! Domain models - cards, wire protocol, error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `Card` - contents of a detected RFID card, plus content-URL parsing
//! - `Command` / `BrowserMessage` - the line protocol to the browser frontend
//! - `ControlError` - the error taxonomy shared by every component

pub mod card;
pub mod error;
pub mod protocol;

pub use card::Card;
pub use error::{ControlError, Result};
pub use protocol::{BrowserLogLevel, BrowserMessage, Command};
