//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod redis;
pub mod sqlite;
pub mod tiered;
pub mod town_controller;
