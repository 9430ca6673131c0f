//! Town directory domain types.
//!
//! Shared vocabulary for the directory engine: identifiers, the persisted
//! town and player records, and the public listing projection.

pub mod error;
pub mod ids;
pub mod town;

pub use error::DomainError;
pub use ids::{PlayerId, TownId};
pub use town::{Player, Town, TownListing};
