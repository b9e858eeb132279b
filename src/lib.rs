//! mediastash - buffered download-and-serve media cache
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod config;
pub mod downloads;
pub mod events;
pub mod refresh;
pub mod server;
pub mod streaming;
pub mod tools;
