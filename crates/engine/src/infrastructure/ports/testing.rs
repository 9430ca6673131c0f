//! Time and randomness behind traits, so tests can pin them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of "now" for persisted timestamps.
#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of town identities and password characters.
pub trait RandomPort: Send + Sync {
    /// A value in `min..=max`.
    fn gen_range(&self, min: i32, max: i32) -> i32;
    fn gen_uuid(&self) -> Uuid;
}
