//! Infrastructure: configuration and task-loop plumbing

pub mod actor;
pub mod config;

pub use actor::ActorLoop;
pub use config::Config;
