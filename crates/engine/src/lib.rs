//! Town directory engine.
//!
//! ## Structure
//!
//! - `infrastructure/` - Storage tiers, configuration and ports
//! - `stores/` - The live town registry
//! - `app` - Application composition

pub mod app;
pub mod infrastructure;
pub mod stores;

pub use app::App;
