//! Two-tier town storage.
//!
//! `TieredStore` presents one `TownStorePort` over a fast tier and a durable
//! tier:
//! - writes, deletes and membership changes go to the durable tier first and
//!   then the fast tier, sequentially; a durable failure never reaches the
//!   fast tier
//! - a fast-tier failure after a durable success is reported as a divergence
//!   and the operation still fails; nothing is rolled back
//! - reads ask the fast tier first and fall back to the durable tier when the
//!   fast tier has nothing, optionally writing the result back
//!
//! `TieredStoreCell` owns the lazy, retryable construction of the store.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use towndir_domain::{Player, PlayerId, Town, TownId};

use crate::infrastructure::lifecycle::{LifecycleCell, LifecycleState};
use crate::infrastructure::ports::{StoreError, TierConnector, TownStorePort};

/// Behavior switches for the tiered store.
#[derive(Debug, Clone)]
pub struct TieredStoreOptions {
    /// Write towns found only in the durable tier back into the fast tier.
    pub backfill_on_miss: bool,
}

impl Default for TieredStoreOptions {
    fn default() -> Self {
        Self {
            backfill_on_miss: true,
        }
    }
}

/// Point-in-time copy of the tier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub fast_hits: u64,
    pub fast_misses: u64,
    pub durable_fallbacks: u64,
    pub backfills: u64,
    pub divergences: u64,
}

#[derive(Debug, Default)]
struct TierCounters {
    fast_hits: AtomicU64,
    fast_misses: AtomicU64,
    durable_fallbacks: AtomicU64,
    backfills: AtomicU64,
    divergences: AtomicU64,
}

impl TierCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierStats {
        TierStats {
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            fast_misses: self.fast_misses.load(Ordering::Relaxed),
            durable_fallbacks: self.durable_fallbacks.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
        }
    }
}

pub struct TieredStore {
    fast: Arc<dyn TownStorePort>,
    durable: Arc<dyn TownStorePort>,
    options: TieredStoreOptions,
    stats: TierCounters,
}

impl TieredStore {
    pub fn new(
        fast: Arc<dyn TownStorePort>,
        durable: Arc<dyn TownStorePort>,
        options: TieredStoreOptions,
    ) -> Self {
        Self {
            fast,
            durable,
            options,
            stats: TierCounters::default(),
        }
    }

    pub fn stats(&self) -> TierStats {
        self.stats.snapshot()
    }

    /// Run `op` against the durable tier, then the fast tier.
    async fn write_through<'a, F, Fut>(
        &'a self,
        operation: &'static str,
        subject: String,
        op: F,
    ) -> Result<(), StoreError>
    where
        F: Fn(&'a dyn TownStorePort) -> Fut,
        Fut: Future<Output = Result<(), StoreError>> + 'a,
    {
        op(self.durable.as_ref()).await?;

        if let Err(e) = op(self.fast.as_ref()).await {
            TierCounters::bump(&self.stats.divergences);
            tracing::warn!(
                operation,
                subject = %subject,
                error = %e,
                "Fast tier write failed after durable write succeeded; tiers have diverged"
            );
            return Err(e);
        }
        Ok(())
    }

    async fn backfill(&self, town: &Town) {
        match self.fast.save_town(town).await {
            Ok(()) => {
                TierCounters::bump(&self.stats.backfills);
                tracing::debug!(town_id = %town.id, "Back-filled fast tier from durable tier");
            }
            Err(e) => {
                tracing::warn!(
                    town_id = %town.id,
                    error = %e,
                    "Failed to back-fill fast tier; next read will fall back again"
                );
            }
        }
    }
}

#[async_trait]
impl TownStorePort for TieredStore {
    async fn save_town(&self, town: &Town) -> Result<(), StoreError> {
        self.write_through("save_town", town.id.to_string(), |tier| tier.save_town(town))
            .await
    }

    async fn get_town(&self, id: TownId) -> Result<Option<Town>, StoreError> {
        if let Some(town) = self.fast.get_town(id).await? {
            TierCounters::bump(&self.stats.fast_hits);
            return Ok(Some(town));
        }
        TierCounters::bump(&self.stats.fast_misses);

        let town = self.durable.get_town(id).await?;
        TierCounters::bump(&self.stats.durable_fallbacks);
        tracing::debug!(town_id = %id, found = town.is_some(), "Fast tier miss, read durable tier");

        if self.options.backfill_on_miss {
            if let Some(town) = town.as_ref() {
                self.backfill(town).await;
            }
        }
        Ok(town)
    }

    async fn list_towns(&self) -> Result<Vec<Town>, StoreError> {
        let fast = self.fast.list_towns().await?;
        if !fast.is_empty() {
            TierCounters::bump(&self.stats.fast_hits);
            return Ok(fast);
        }
        TierCounters::bump(&self.stats.fast_misses);

        let towns = self.durable.list_towns().await?;
        TierCounters::bump(&self.stats.durable_fallbacks);
        tracing::debug!(count = towns.len(), "Fast tier empty, listed durable tier");

        if self.options.backfill_on_miss {
            for town in &towns {
                self.backfill(town).await;
            }
        }
        Ok(towns)
    }

    async fn delete_town(&self, id: TownId) -> Result<(), StoreError> {
        self.write_through("delete_town", id.to_string(), |tier| tier.delete_town(id))
            .await
    }

    async fn add_player_to_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        self.write_through("add_player_to_town", town_id.to_string(), |tier| {
            tier.add_player_to_town(player_id, town_id)
        })
        .await
    }

    async fn remove_player_from_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        self.write_through("remove_player_from_town", town_id.to_string(), |tier| {
            tier.remove_player_from_town(player_id, town_id)
        })
        .await
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        self.write_through("save_player", player.id.to_string(), |tier| {
            tier.save_player(player)
        })
        .await
    }
}

/// Owns the process's `TieredStore` and builds it on first use.
pub struct TieredStoreCell {
    fast: Arc<dyn TierConnector>,
    durable: Arc<dyn TierConnector>,
    options: TieredStoreOptions,
    cell: LifecycleCell<TieredStore>,
}

impl TieredStoreCell {
    pub fn new(
        fast: Arc<dyn TierConnector>,
        durable: Arc<dyn TierConnector>,
        options: TieredStoreOptions,
    ) -> Self {
        Self {
            fast,
            durable,
            options,
            cell: LifecycleCell::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.cell.state()
    }

    /// The ready store, connecting both tiers concurrently on first use.
    ///
    /// Any tier failure yields `ClusterSetupFailed`; nothing is kept, so the
    /// next call connects both tiers again.
    pub async fn get_instance(&self) -> Result<Arc<TieredStore>, StoreError> {
        self.cell
            .get_or_try_init(|| async {
                tracing::info!(
                    fast = self.fast.tier_name(),
                    durable = self.durable.tier_name(),
                    "Setting up tiered town storage"
                );
                let (fast, durable) =
                    futures_util::future::join(self.fast.connect(), self.durable.connect()).await;

                match (fast, durable) {
                    (Ok(fast), Ok(durable)) => {
                        tracing::info!("Tiered town storage ready");
                        Ok(TieredStore::new(fast, durable, self.options.clone()))
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!(error = %e, "Tiered town storage setup failed");
                        Err(StoreError::cluster_setup(e))
                    }
                }
            })
            .await
    }
}
