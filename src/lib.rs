//! Audiobox control plane library
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod hw;
pub mod infra;
pub mod io;
pub mod services;
