//! Infrastructure layer
//!
//! ESP32 implementations of the core crate's hardware seams, the shared
//! firmware state and the embassy tasks that drive them.

pub mod config;
pub mod drivers;
pub mod services;
pub mod tasks;
