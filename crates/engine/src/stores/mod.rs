//! In-memory state owned by the running directory.
//!
//! - `TownsStore` - live town controllers, backed by tiered storage

pub mod towns;

pub use towns::{DirectoryError, TownsStore};
