//! Storage port traits.

use std::sync::Arc;

use async_trait::async_trait;
use towndir_domain::{Player, PlayerId, Town, TownId};

use super::error::StoreError;

// =============================================================================
// Town Storage
// =============================================================================

/// Uniform read/write surface every storage tier implements.
///
/// Every operation fails with `StoreError::BackendNotReady` when the backend
/// has not completed connection setup. Unknown ids are never an error: reads
/// return `None` and writes are no-ops.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TownStorePort: Send + Sync {
    /// Upsert by id, replacing the stored member set.
    async fn save_town(&self, town: &Town) -> Result<(), StoreError>;
    async fn get_town(&self, id: TownId) -> Result<Option<Town>, StoreError>;
    async fn list_towns(&self) -> Result<Vec<Town>, StoreError>;
    /// Idempotent.
    async fn delete_town(&self, id: TownId) -> Result<(), StoreError>;

    // Membership only, the rest of the town record is untouched
    async fn add_player_to_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError>;
    async fn remove_player_from_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError>;

    async fn save_player(&self, player: &Player) -> Result<(), StoreError>;
}

// =============================================================================
// Tier Setup
// =============================================================================

/// Brings one storage tier up and hands back a ready handle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TierConnector: Send + Sync {
    fn tier_name(&self) -> &'static str;

    /// Connect and probe the backend. An unusable handle is an error.
    async fn connect(&self) -> Result<Arc<dyn TownStorePort>, StoreError>;
}
