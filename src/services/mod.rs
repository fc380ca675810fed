//! Application services

pub mod orchestrator;
pub mod repeat;
pub mod sound;
pub mod system;

pub use orchestrator::{event_channel, ControlEvent, EventSender, Orchestrator};
pub use sound::{ShellSynthesizer, Synthesizer};
pub use system::System;
