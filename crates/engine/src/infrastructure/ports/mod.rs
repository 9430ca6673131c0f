//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Town storage (each tier: SQLite, Redis, in-memory)
//! - Tier setup (connect + liveness probe)
//! - Town controllers (player connections live behind this seam)
//! - Clock/Random (for testing)

mod controller;
mod error;
mod repos;
mod testing;

// =============================================================================
// Storage Ports
// =============================================================================
pub use repos::{TierConnector, TownStorePort};

// =============================================================================
// Controller Ports
// =============================================================================
pub use controller::{TownController, TownControllerFactory, TownListener};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use repos::{MockTierConnector, MockTownStorePort};

#[cfg(test)]
pub use controller::MockTownListener;

#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::{ClockPort, RandomPort};

// =============================================================================
// Error Types
// =============================================================================
pub use error::StoreError;
