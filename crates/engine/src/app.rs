//! Application composition.

use std::sync::Arc;

use crate::infrastructure::{
    clock::{SystemClock, SystemRandom},
    config::{AppConfig, StorageConfig},
    lifecycle::LifecycleCell,
    memory::{MemoryConnector, MemoryTownStore},
    ports::{ClockPort, RandomPort, StoreError, TierConnector, TownControllerFactory},
    redis::RedisConnector,
    sqlite::SqliteConnector,
    tiered::{TieredStore, TieredStoreCell, TieredStoreOptions},
    town_controller::LiveTownControllerFactory,
};
use crate::stores::{DirectoryError, TownsStore};

/// Main application state.
///
/// Owns the process-wide storage and registry lifecycles. Both are built on
/// first use; a failed build leaves them uninitialized and the next call
/// tries again.
pub struct App {
    config: AppConfig,
    storage: TieredStoreCell,
    controllers: Arc<dyn TownControllerFactory>,
    towns: LifecycleCell<TownsStore>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self::with_ports(config, Arc::new(SystemClock), Arc::new(SystemRandom))
    }

    /// Create an App with injected time and randomness.
    pub fn with_ports(
        config: AppConfig,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        let (fast, durable): (Arc<dyn TierConnector>, Arc<dyn TierConnector>) =
            match &config.storage {
                StorageConfig::Cluster {
                    durable_url,
                    fast_nodes,
                } => (
                    Arc::new(RedisConnector::new(fast_nodes.clone())),
                    Arc::new(SqliteConnector::new(durable_url.clone(), clock)),
                ),
                StorageConfig::Memory => (
                    Arc::new(MemoryConnector::new("fast", Arc::new(MemoryTownStore::new()))),
                    Arc::new(MemoryConnector::new(
                        "durable",
                        Arc::new(MemoryTownStore::new()),
                    )),
                ),
            };

        let options = TieredStoreOptions {
            backfill_on_miss: config.backfill_on_miss,
        };

        Self {
            storage: TieredStoreCell::new(fast, durable, options),
            controllers: Arc::new(LiveTownControllerFactory::new(random)),
            towns: LifecycleCell::new(),
            config,
        }
    }

    pub async fn storage(&self) -> Result<Arc<TieredStore>, StoreError> {
        self.storage.get_instance().await
    }

    /// The town registry, bootstrapped from persisted towns on first use.
    pub async fn towns(&self) -> Result<Arc<TownsStore>, DirectoryError> {
        self.towns
            .get_or_try_init(|| {
                TownsStore::initialize(
                    &self.storage,
                    self.controllers.clone(),
                    self.config.master_password.clone(),
                )
            })
            .await
    }
}
