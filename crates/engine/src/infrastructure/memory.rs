//! In-process town storage.
//!
//! Backs the `memory` storage mode and stands in for either tier in tests.
//! Reads are counted so tests can tell which tier served a request.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use towndir_domain::{Player, PlayerId, Town, TownId};

use crate::infrastructure::ports::{StoreError, TierConnector, TownStorePort};

/// A thread-safe town store held entirely in memory.
#[derive(Default)]
pub struct MemoryTownStore {
    towns: DashMap<TownId, Town>,
    players: DashMap<PlayerId, Player>,
    reads: AtomicUsize,
}

impl MemoryTownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_town` / `list_towns` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Drop every town and player, bypassing the tiered write path.
    pub fn clear(&self) {
        self.towns.clear();
        self.players.clear();
    }

    pub fn len(&self) -> usize {
        self.towns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.towns.is_empty()
    }

    /// Peek at a stored town without counting a read.
    pub fn peek(&self, id: TownId) -> Option<Town> {
        self.towns.get(&id).map(|entry| entry.value().clone())
    }

    pub fn player(&self, id: PlayerId) -> Option<Player> {
        self.players.get(&id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl TownStorePort for MemoryTownStore {
    async fn save_town(&self, town: &Town) -> Result<(), StoreError> {
        self.towns.insert(town.id, town.clone());
        Ok(())
    }

    async fn get_town(&self, id: TownId) -> Result<Option<Town>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.peek(id))
    }

    async fn list_towns(&self) -> Result<Vec<Town>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut towns: Vec<Town> = self
            .towns
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        towns.sort_by(|a, b| {
            a.friendly_name
                .cmp(&b.friendly_name)
                .then_with(|| a.id.to_uuid().cmp(&b.id.to_uuid()))
        });
        Ok(towns)
    }

    async fn delete_town(&self, id: TownId) -> Result<(), StoreError> {
        self.towns.remove(&id);
        Ok(())
    }

    async fn add_player_to_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        if let Some(mut town) = self.towns.get_mut(&town_id) {
            town.add_player(player_id);
        }
        Ok(())
    }

    async fn remove_player_from_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        if let Some(mut town) = self.towns.get_mut(&town_id) {
            town.remove_player(player_id);
        }
        Ok(())
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        self.players.insert(player.id, player.clone());
        Ok(())
    }
}

/// Hands out a shared `MemoryTownStore` as a storage tier.
pub struct MemoryConnector {
    name: &'static str,
    store: Arc<MemoryTownStore>,
    failures_remaining: AtomicU32,
}

impl MemoryConnector {
    pub fn new(name: &'static str, store: Arc<MemoryTownStore>) -> Self {
        Self {
            name,
            store,
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn failing(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl TierConnector for MemoryConnector {
    fn tier_name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self) -> Result<Arc<dyn TownStorePort>, StoreError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::connection(self.name, "simulated connect failure"));
        }
        let store: Arc<dyn TownStorePort> = self.store.clone();
        Ok(store)
    }
}
