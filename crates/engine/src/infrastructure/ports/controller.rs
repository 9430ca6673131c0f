//! Town controller port.
//!
//! A controller owns one live town: its players and their connections. The
//! registry only touches it through this trait.

use std::sync::Arc;

use async_trait::async_trait;
use towndir_domain::{Player, PlayerId, Town, TownId};

#[async_trait]
pub trait TownController: Send + Sync {
    fn town_id(&self) -> TownId;
    fn update_password(&self) -> &str;
    fn capacity(&self) -> u32;

    async fn friendly_name(&self) -> String;
    async fn set_friendly_name(&self, name: String);
    async fn is_publicly_listed(&self) -> bool;
    async fn set_publicly_listed(&self, is_public: bool);
    async fn occupancy(&self) -> u32;

    /// Returns `false` if the player was already present. Capacity is not checked.
    async fn add_player(&self, player: Player) -> bool;
    /// Returns `false` if the player was not present.
    async fn remove_player(&self, player_id: PlayerId) -> bool;
    /// Drop every player and notify all listeners that the town is gone.
    async fn disconnect_all_players(&self);

    /// Snapshot of the full persisted record.
    async fn to_town(&self) -> Town;
}

/// Assigns identity and password to new towns.
pub trait TownControllerFactory: Send + Sync {
    fn create(&self, friendly_name: &str, is_publicly_listed: bool) -> Arc<dyn TownController>;
}

/// Receives town lifecycle notifications (one per connected player socket).
#[cfg_attr(test, mockall::automock)]
pub trait TownListener: Send + Sync {
    fn on_town_destroyed(&self);
}
