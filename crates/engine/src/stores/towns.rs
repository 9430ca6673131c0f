//! Registry of live towns.
//!
//! `TownsStore` holds the controllers for every town this process serves,
//! persists through the tiered store and gates mutations behind each town's
//! update password (or the master override).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use towndir_domain::{Player, PlayerId, Town, TownId, TownListing};

use crate::infrastructure::config::MasterPassword;
use crate::infrastructure::ports::{StoreError, TownController, TownControllerFactory, TownStorePort};
use crate::infrastructure::tiered::TieredStoreCell;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Town directory bootstrap failed: {0}")]
    BootstrapFailed(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a mutation actually did. Callers only see `true` for `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationOutcome {
    Applied,
    NotFound,
    Unauthorized,
    Invalid,
}

impl MutationOutcome {
    fn report(self, operation: &'static str, town_id: TownId) -> bool {
        tracing::debug!(operation, town_id = %town_id, outcome = ?self, "Town mutation");
        self == Self::Applied
    }
}

pub struct TownsStore {
    storage: Arc<dyn TownStorePort>,
    controllers: Arc<dyn TownControllerFactory>,
    master: MasterPassword,
    towns: Mutex<HashMap<TownId, Arc<dyn TownController>>>,
}

impl TownsStore {
    /// Connect the tiered store and adopt every persisted town.
    pub async fn initialize(
        storage: &TieredStoreCell,
        controllers: Arc<dyn TownControllerFactory>,
        master: MasterPassword,
    ) -> Result<Self, DirectoryError> {
        let storage = storage
            .get_instance()
            .await
            .map_err(DirectoryError::BootstrapFailed)?;
        Self::with_storage(storage, controllers, master).await
    }

    /// Adopt-and-replace: each persisted town is deleted and recreated with
    /// a fresh id and password, keeping its name and visibility.
    pub async fn with_storage(
        storage: Arc<dyn TownStorePort>,
        controllers: Arc<dyn TownControllerFactory>,
        master: MasterPassword,
    ) -> Result<Self, DirectoryError> {
        let store = Self {
            storage,
            controllers,
            master,
            towns: Mutex::new(HashMap::new()),
        };

        let persisted = store
            .storage
            .list_towns()
            .await
            .map_err(DirectoryError::BootstrapFailed)?;

        for town in persisted {
            store
                .storage
                .delete_town(town.id)
                .await
                .map_err(DirectoryError::BootstrapFailed)?;
            let replacement = store
                .create_town(&town.friendly_name, town.is_publicly_listed)
                .await
                .map_err(|e| match e {
                    DirectoryError::Store(e) | DirectoryError::BootstrapFailed(e) => {
                        DirectoryError::BootstrapFailed(e)
                    }
                })?;
            tracing::info!(
                old_town_id = %town.id,
                town_id = %replacement.town_id(),
                friendly_name = %town.friendly_name,
                "Replaced persisted town"
            );
        }

        tracing::info!(towns = store.towns.lock().await.len(), "Town directory ready");
        Ok(store)
    }

    pub async fn get_controller_for_town(&self, id: TownId) -> Option<Arc<dyn TownController>> {
        self.towns.lock().await.get(&id).cloned()
    }

    /// Public towns as recorded in storage.
    pub async fn list_public_towns(&self) -> Result<Vec<TownListing>, DirectoryError> {
        let towns = self.storage.list_towns().await?;
        Ok(towns
            .iter()
            .filter(|town| town.is_publicly_listed)
            .map(|town| town.listing())
            .collect())
    }

    pub async fn create_town(
        &self,
        friendly_name: &str,
        is_publicly_listed: bool,
    ) -> Result<Arc<dyn TownController>, DirectoryError> {
        let mut towns = self.towns.lock().await;
        let controller = self.controllers.create(friendly_name, is_publicly_listed);
        self.storage.save_town(&controller.to_town().await).await?;
        towns.insert(controller.town_id(), controller.clone());
        tracing::info!(town_id = %controller.town_id(), is_publicly_listed, "Created town");
        Ok(controller)
    }

    /// Change a town's name and/or visibility.
    ///
    /// An empty `friendly_name` rejects the whole update, visibility included.
    pub async fn update_town(
        &self,
        town_id: TownId,
        password: &str,
        friendly_name: Option<String>,
        make_public: Option<bool>,
    ) -> Result<bool, DirectoryError> {
        let towns = self.towns.lock().await;
        let outcome = match self.authorize(&towns, town_id, password) {
            Err(outcome) => outcome,
            Ok(_)
                if friendly_name
                    .as_deref()
                    .is_some_and(|name| Town::validate_friendly_name(name).is_err()) =>
            {
                MutationOutcome::Invalid
            }
            Ok(controller) => {
                if let Some(name) = friendly_name {
                    controller.set_friendly_name(name).await;
                }
                if let Some(is_public) = make_public {
                    controller.set_publicly_listed(is_public).await;
                }
                self.storage.save_town(&controller.to_town().await).await?;
                MutationOutcome::Applied
            }
        };
        Ok(outcome.report("update_town", town_id))
    }

    pub async fn delete_town(&self, town_id: TownId, password: &str) -> Result<bool, DirectoryError> {
        let mut towns = self.towns.lock().await;
        let outcome = match self.authorize(&towns, town_id, password).map(|_| ()) {
            Err(outcome) => outcome,
            Ok(()) => {
                if let Some(controller) = towns.remove(&town_id) {
                    controller.disconnect_all_players().await;
                }
                self.storage.delete_town(town_id).await?;
                MutationOutcome::Applied
            }
        };
        Ok(outcome.report("delete_town", town_id))
    }

    /// Join a player to a live town. Capacity is not enforced.
    pub async fn add_player(&self, town_id: TownId, player: Player) -> Result<bool, DirectoryError> {
        let towns = self.towns.lock().await;
        let outcome = match towns.get(&town_id) {
            None => MutationOutcome::NotFound,
            Some(controller) => {
                let player_id = player.id;
                self.storage.save_player(&player).await?;
                if controller.add_player(player).await {
                    self.storage.add_player_to_town(player_id, town_id).await?;
                    self.storage.save_town(&controller.to_town().await).await?;
                    MutationOutcome::Applied
                } else {
                    MutationOutcome::Invalid
                }
            }
        };
        Ok(outcome.report("add_player", town_id))
    }

    pub async fn remove_player(
        &self,
        town_id: TownId,
        player_id: PlayerId,
    ) -> Result<bool, DirectoryError> {
        let towns = self.towns.lock().await;
        let outcome = match towns.get(&town_id) {
            None => MutationOutcome::NotFound,
            Some(controller) => {
                if controller.remove_player(player_id).await {
                    self.storage.remove_player_from_town(player_id, town_id).await?;
                    self.storage.save_town(&controller.to_town().await).await?;
                    MutationOutcome::Applied
                } else {
                    MutationOutcome::Invalid
                }
            }
        };
        Ok(outcome.report("remove_player", town_id))
    }

    fn authorize<'a>(
        &self,
        towns: &'a HashMap<TownId, Arc<dyn TownController>>,
        town_id: TownId,
        password: &str,
    ) -> Result<&'a Arc<dyn TownController>, MutationOutcome> {
        let controller = towns.get(&town_id).ok_or(MutationOutcome::NotFound)?;
        if self.password_matches(controller.as_ref(), password) {
            Ok(controller)
        } else {
            Err(MutationOutcome::Unauthorized)
        }
    }

    fn password_matches(&self, controller: &dyn TownController, provided: &str) -> bool {
        controller.update_password() == provided || self.master.matches(provided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemRandom;
    use crate::infrastructure::memory::{MemoryConnector, MemoryTownStore};
    use crate::infrastructure::ports::MockTownStorePort;
    use crate::infrastructure::tiered::{TieredStore, TieredStoreOptions};
    use crate::infrastructure::town_controller::LiveTownControllerFactory;
    struct Fixture {
        fast: Arc<MemoryTownStore>,
        durable: Arc<MemoryTownStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                fast: Arc::new(MemoryTownStore::new()),
                durable: Arc::new(MemoryTownStore::new()),
            }
        }

        async fn registry(&self, master: MasterPassword) -> TownsStore {
            let storage = Arc::new(TieredStore::new(
                self.fast.clone(),
                self.durable.clone(),
                TieredStoreOptions::default(),
            ));
            TownsStore::with_storage(storage, factory(), master)
                .await
                .expect("bootstrap")
        }
    }

    fn factory() -> Arc<dyn TownControllerFactory> {
        Arc::new(LiveTownControllerFactory::new(Arc::new(SystemRandom)))
    }

    #[tokio::test]
    async fn listing_shows_only_public_towns_without_password() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let public = registry.create_town("Plaza", true).await.expect("create");
        registry.create_town("Hideout", false).await.expect("create");

        let listed = registry.list_public_towns().await.expect("list");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, public.town_id());
        assert_eq!(listed[0].friendly_name, "Plaza");
        assert_eq!(listed[0].maximum_occupancy, public.capacity());
        let json = serde_json::to_string(&listed).expect("json");
        assert!(!json.contains(public.update_password()));
        assert!(!json.contains("Password"));
    }

    #[tokio::test]
    async fn update_changes_only_the_name() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");
        let password = town.update_password().to_string();
        registry
            .add_player(town.town_id(), Player::new("ada"))
            .await
            .expect("join");

        let updated = registry
            .update_town(town.town_id(), &password, Some("Square".to_string()), None)
            .await
            .expect("update");

        assert!(updated);
        assert_eq!(town.friendly_name().await, "Square");
        assert!(town.is_publicly_listed().await);
        assert_eq!(town.update_password(), password);
        let stored = fx.durable.peek(town.town_id()).expect("persisted");
        assert_eq!(stored.friendly_name, "Square");
        assert_eq!(stored.update_password, password);
        assert_eq!(stored.capacity, town.capacity());
        assert_eq!(stored.occupancy, 1);
        assert_eq!(town.occupancy().await, 1);
    }

    #[tokio::test]
    async fn hiding_a_town_drops_it_from_the_listing() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");
        let password = town.update_password().to_string();
        assert_eq!(registry.list_public_towns().await.expect("list").len(), 1);

        let updated = registry
            .update_town(town.town_id(), &password, None, Some(false))
            .await
            .expect("update");

        assert!(updated);
        assert!(registry.list_public_towns().await.expect("list").is_empty());
        assert_eq!(town.friendly_name().await, "Plaza");
        let stored = fx.durable.peek(town.town_id()).expect("persisted");
        assert!(!stored.is_publicly_listed);
        assert_eq!(stored.capacity, town.capacity());
        assert_eq!(stored.occupancy, 0);
    }

    #[tokio::test]
    async fn blank_master_override_authorizes_nothing() {
        let fx = Fixture::new();
        let config = crate::infrastructure::config::AppConfig::from_lookup(|key| match key {
            "STORAGE_MODE" => Some("memory".to_string()),
            "MASTER_TOWN_PASSWORD" | "MASTER_TOWN_PASWORD" => Some(String::new()),
            _ => None,
        })
        .expect("config");
        let registry = fx.registry(config.master_password).await;
        let town = registry.create_town("Plaza", true).await.expect("create");

        let updated = registry
            .update_town(town.town_id(), "", Some("Taken".to_string()), None)
            .await
            .expect("update");
        let deleted = registry.delete_town(town.town_id(), "").await.expect("delete");

        assert!(!updated);
        assert!(!deleted);
        assert!(registry.get_controller_for_town(town.town_id()).await.is_some());
        assert!(fx.durable.peek(town.town_id()).is_some());
    }

    #[tokio::test]
    async fn empty_name_rejects_the_whole_update() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");
        let password = town.update_password().to_string();

        let updated = registry
            .update_town(town.town_id(), &password, Some(String::new()), Some(false))
            .await
            .expect("update");

        assert!(!updated);
        assert_eq!(town.friendly_name().await, "Plaza");
        assert!(town.is_publicly_listed().await);
        assert!(fx.durable.peek(town.town_id()).expect("persisted").is_publicly_listed);
    }

    #[tokio::test]
    async fn wrong_password_changes_nothing() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");

        let updated = registry
            .update_town(town.town_id(), "nope", Some("Square".to_string()), Some(false))
            .await
            .expect("update");
        let deleted = registry.delete_town(town.town_id(), "nope").await.expect("delete");

        assert!(!updated);
        assert!(!deleted);
        assert_eq!(town.friendly_name().await, "Plaza");
        assert!(registry.get_controller_for_town(town.town_id()).await.is_some());
        assert!(fx.durable.peek(town.town_id()).is_some());
    }

    #[tokio::test]
    async fn unknown_town_is_indistinguishable_from_bad_password() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;

        let updated = registry
            .update_town(TownId::new(), "pw", None, Some(true))
            .await
            .expect("update");
        assert!(!updated);
        assert!(!registry.delete_town(TownId::new(), "pw").await.expect("delete"));
    }

    #[tokio::test]
    async fn delete_removes_from_lookup_and_both_tiers() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");
        registry
            .add_player(town.town_id(), Player::new("ada"))
            .await
            .expect("join");
        let password = town.update_password().to_string();

        assert!(registry.delete_town(town.town_id(), &password).await.expect("delete"));

        assert!(registry.get_controller_for_town(town.town_id()).await.is_none());
        assert!(fx.durable.peek(town.town_id()).is_none());
        assert!(fx.fast.peek(town.town_id()).is_none());
        assert_eq!(town.occupancy().await, 0);
    }

    #[tokio::test]
    async fn master_override_uses_the_misspelled_variable() {
        let fx = Fixture::new();
        let master = MasterPassword {
            enabled_by: Some("enabled".to_string()),
            compared_value: Some("override".to_string()),
        };
        let registry = fx.registry(master).await;
        let town = registry.create_town("Plaza", true).await.expect("create");

        let with_enabling_value = registry
            .update_town(town.town_id(), "enabled", Some("A".to_string()), None)
            .await
            .expect("update");
        let with_compared_value = registry
            .update_town(town.town_id(), "override", Some("B".to_string()), None)
            .await
            .expect("update");

        assert!(!with_enabling_value);
        assert!(with_compared_value);
        assert_eq!(town.friendly_name().await, "B");
    }

    #[tokio::test]
    async fn membership_is_persisted_to_both_tiers() {
        let fx = Fixture::new();
        let registry = fx.registry(MasterPassword::disabled()).await;
        let town = registry.create_town("Plaza", true).await.expect("create");
        let ada = Player::new("ada");

        assert!(registry.add_player(town.town_id(), ada.clone()).await.expect("join"));
        assert!(!registry.add_player(town.town_id(), ada.clone()).await.expect("rejoin"));
        assert!(!registry.add_player(TownId::new(), ada.clone()).await.expect("no town"));

        let stored = fx.durable.peek(town.town_id()).expect("persisted");
        assert_eq!(stored.players, vec![ada.id]);
        assert_eq!(stored.occupancy, 1);
        assert_eq!(fx.fast.peek(town.town_id()).expect("cached").occupancy, 1);
        assert_eq!(fx.durable.player(ada.id), Some(ada.clone()));

        assert!(registry.remove_player(town.town_id(), ada.id).await.expect("leave"));
        assert!(!registry.remove_player(town.town_id(), ada.id).await.expect("leave again"));
        let stored = fx.durable.peek(town.town_id()).expect("persisted");
        assert!(stored.players.is_empty());
        assert_eq!(stored.occupancy, 0);
    }

    #[tokio::test]
    async fn bootstrap_replaces_persisted_alpha() {
        let fx = Fixture::new();
        let original = Town::new(TownId::new(), "Alpha", "old-secret", true, 50);
        fx.durable.save_town(&original).await.expect("seed");

        let registry = fx.registry(MasterPassword::disabled()).await;

        assert!(fx.durable.peek(original.id).is_none());
        assert!(registry.get_controller_for_town(original.id).await.is_none());

        let durable = fx.durable.list_towns().await.expect("durable");
        let fast = fx.fast.list_towns().await.expect("fast");
        assert_eq!(durable.len(), 1);
        assert_eq!(fast, durable);

        let fresh = &durable[0];
        assert_eq!(fresh.friendly_name, "Alpha");
        assert!(fresh.is_publicly_listed);
        assert_ne!(fresh.id, original.id);
        assert_ne!(fresh.update_password, original.update_password);

        let live = registry
            .get_controller_for_town(fresh.id)
            .await
            .expect("registered");
        assert_eq!(live.friendly_name().await, "Alpha");
    }

    #[tokio::test]
    async fn bootstrap_failure_is_reported() {
        let mut storage = MockTownStorePort::new();
        storage
            .expect_list_towns()
            .returning(|| Err(StoreError::not_ready("sqlite")));

        let result =
            TownsStore::with_storage(Arc::new(storage), factory(), MasterPassword::disabled()).await;

        assert!(matches!(
            result,
            Err(DirectoryError::BootstrapFailed(StoreError::BackendNotReady { .. }))
        ));
    }

    #[tokio::test]
    async fn unreachable_tier_fails_bootstrap_then_recovers() {
        let fast = Arc::new(MemoryConnector::new("fast", Arc::new(MemoryTownStore::new())));
        let durable = Arc::new(
            MemoryConnector::new("durable", Arc::new(MemoryTownStore::new())).failing(1),
        );
        let cell = TieredStoreCell::new(fast, durable, TieredStoreOptions::default());

        let first = TownsStore::initialize(&cell, factory(), MasterPassword::disabled()).await;
        assert!(matches!(
            first,
            Err(DirectoryError::BootstrapFailed(StoreError::ClusterSetupFailed(_)))
        ));

        let second = TownsStore::initialize(&cell, factory(), MasterPassword::disabled()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn storage_failure_during_update_is_an_error() {
        let mut storage = MockTownStorePort::new();
        storage.expect_list_towns().returning(|| Ok(Vec::new()));
        let mut saves = 0;
        storage.expect_save_town().returning(move |_| {
            saves += 1;
            if saves == 1 {
                Ok(())
            } else {
                Err(StoreError::database("save_town", "disk I/O error"))
            }
        });
        let registry =
            TownsStore::with_storage(Arc::new(storage), factory(), MasterPassword::disabled())
                .await
                .expect("bootstrap");
        let town = registry.create_town("Plaza", true).await.expect("create");
        let password = town.update_password().to_string();

        let result = registry
            .update_town(town.town_id(), &password, Some("Square".to_string()), None)
            .await;

        assert!(matches!(result, Err(DirectoryError::Store(StoreError::Database { .. }))));
    }
}
