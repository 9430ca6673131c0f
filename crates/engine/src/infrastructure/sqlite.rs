//! SQLite-backed durable town storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;
use towndir_domain::{Player, PlayerId, Town, TownId};

use crate::infrastructure::ports::{ClockPort, StoreError, TierConnector, TownStorePort};

const BACKEND: &str = "sqlite";

/// SQLite implementation of the durable tier.
///
/// Constructed disconnected; every operation fails with `BackendNotReady`
/// until [`SqliteTownStore::connect`] has completed.
pub struct SqliteTownStore {
    url: String,
    pool: OnceCell<SqlitePool>,
    clock: Arc<dyn ClockPort>,
}

impl SqliteTownStore {
    pub fn new(url: impl Into<String>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            url: url.into(),
            pool: OnceCell::new(),
            clock,
        }
    }

    /// Open the pool, create the schema and probe the connection.
    pub async fn connect(&self) -> Result<(), StoreError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = SqlitePool::connect(&self.url)
                    .await
                    .map_err(|e| StoreError::connection(BACKEND, e))?;
                ensure_schema(&pool).await?;
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .map_err(|e| StoreError::connection(BACKEND, e))?;
                Ok::<_, StoreError>(pool)
            })
            .await?;
        Ok(())
    }

    fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool.get().ok_or_else(|| StoreError::not_ready(BACKEND))
    }

    async fn load_players(
        &self,
        pool: &SqlitePool,
        town_id: Option<TownId>,
    ) -> Result<HashMap<TownId, Vec<PlayerId>>, StoreError> {
        let rows = match town_id {
            Some(id) => {
                sqlx::query(
                    "SELECT town_id, player_id FROM town_players WHERE town_id = ? ORDER BY rowid",
                )
                .bind(id.to_string())
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query("SELECT town_id, player_id FROM town_players ORDER BY rowid")
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(|e| StoreError::database("load_players", e))?;

        let mut players: HashMap<TownId, Vec<PlayerId>> = HashMap::new();
        for row in rows {
            let town_id = parse_column(&row, "town_id")?;
            let player_id = parse_column(&row, "player_id")?;
            players.entry(town_id).or_default().push(player_id);
        }
        Ok(players)
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in [
        r#"
        CREATE TABLE IF NOT EXISTS towns (
            town_id TEXT PRIMARY KEY NOT NULL,
            friendly_name TEXT NOT NULL,
            update_password TEXT NOT NULL,
            is_publicly_listed INTEGER NOT NULL,
            occupancy INTEGER NOT NULL,
            capacity INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS town_players (
            town_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            PRIMARY KEY (town_id, player_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS players (
            player_id TEXT PRIMARY KEY NOT NULL,
            user_name TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::connection(BACKEND, e))?;
    }
    Ok(())
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row
        .try_get(column)
        .map_err(StoreError::serialization)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::serialization(format!("{column}: {e}")))
}

fn u32_column(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row
        .try_get(column)
        .map_err(StoreError::serialization)?;
    u32::try_from(value).map_err(|e| StoreError::serialization(format!("{column}: {e}")))
}

fn town_from_row(row: &SqliteRow, players: Vec<PlayerId>) -> Result<Town, StoreError> {
    let is_public: i64 = row
        .try_get("is_publicly_listed")
        .map_err(StoreError::serialization)?;
    Ok(Town {
        id: parse_column(row, "town_id")?,
        friendly_name: row
            .try_get("friendly_name")
            .map_err(StoreError::serialization)?,
        update_password: row
            .try_get("update_password")
            .map_err(StoreError::serialization)?,
        is_publicly_listed: is_public != 0,
        occupancy: u32_column(row, "occupancy")?,
        capacity: u32_column(row, "capacity")?,
        players,
    })
}

#[async_trait]
impl TownStorePort for SqliteTownStore {
    async fn save_town(&self, town: &Town) -> Result<(), StoreError> {
        let pool = self.pool()?;
        let now = self.clock.now().to_rfc3339();
        let town_id = town.id.to_string();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::database("save_town", e))?;

        sqlx::query(
            r#"
            INSERT INTO towns (town_id, friendly_name, update_password, is_publicly_listed,
                               occupancy, capacity, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(town_id) DO UPDATE SET
                friendly_name = excluded.friendly_name,
                update_password = excluded.update_password,
                is_publicly_listed = excluded.is_publicly_listed,
                occupancy = excluded.occupancy,
                capacity = excluded.capacity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&town_id)
        .bind(&town.friendly_name)
        .bind(&town.update_password)
        .bind(town.is_publicly_listed)
        .bind(i64::from(town.occupancy))
        .bind(i64::from(town.capacity))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::database("save_town", e))?;

        sqlx::query("DELETE FROM town_players WHERE town_id = ?")
            .bind(&town_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::database("save_town", e))?;

        for player_id in &town.players {
            sqlx::query("INSERT OR IGNORE INTO town_players (town_id, player_id) VALUES (?, ?)")
                .bind(&town_id)
                .bind(player_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::database("save_town", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::database("save_town", e))?;
        Ok(())
    }

    async fn get_town(&self, id: TownId) -> Result<Option<Town>, StoreError> {
        let pool = self.pool()?;
        let row = sqlx::query("SELECT * FROM towns WHERE town_id = ?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(|e| StoreError::database("get_town", e))?;

        match row {
            Some(row) => {
                let mut players = self.load_players(pool, Some(id)).await?;
                let town = town_from_row(&row, players.remove(&id).unwrap_or_default())?;
                Ok(Some(town))
            }
            None => Ok(None),
        }
    }

    async fn list_towns(&self) -> Result<Vec<Town>, StoreError> {
        let pool = self.pool()?;
        let rows = sqlx::query("SELECT * FROM towns ORDER BY rowid")
            .fetch_all(pool)
            .await
            .map_err(|e| StoreError::database("list_towns", e))?;
        let mut players = self.load_players(pool, None).await?;

        rows.iter()
            .map(|row| {
                let id: TownId = parse_column(row, "town_id")?;
                town_from_row(row, players.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn delete_town(&self, id: TownId) -> Result<(), StoreError> {
        let pool = self.pool()?;
        let town_id = id.to_string();
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        sqlx::query("DELETE FROM town_players WHERE town_id = ?")
            .bind(&town_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        sqlx::query("DELETE FROM towns WHERE town_id = ?")
            .bind(&town_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        Ok(())
    }

    async fn add_player_to_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        let pool = self.pool()?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO town_players (town_id, player_id)
            SELECT town_id, ? FROM towns WHERE town_id = ?
            "#,
        )
        .bind(player_id.to_string())
        .bind(town_id.to_string())
        .execute(pool)
        .await
        .map_err(|e| StoreError::database("add_player_to_town", e))?;
        Ok(())
    }

    async fn remove_player_from_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        let pool = self.pool()?;
        sqlx::query("DELETE FROM town_players WHERE town_id = ? AND player_id = ?")
            .bind(town_id.to_string())
            .bind(player_id.to_string())
            .execute(pool)
            .await
            .map_err(|e| StoreError::database("remove_player_from_town", e))?;
        Ok(())
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        let pool = self.pool()?;
        sqlx::query(
            r#"
            INSERT INTO players (player_id, user_name, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(player_id) DO UPDATE SET
                user_name = excluded.user_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(player.id.to_string())
        .bind(&player.user_name)
        .bind(self.clock.now().to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| StoreError::database("save_player", e))?;
        Ok(())
    }
}

/// Durable tier connector: opens a fresh `SqliteTownStore` on every attempt.
pub struct SqliteConnector {
    url: String,
    clock: Arc<dyn ClockPort>,
}

impl SqliteConnector {
    pub fn new(url: impl Into<String>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            url: url.into(),
            clock,
        }
    }
}

#[async_trait]
impl TierConnector for SqliteConnector {
    fn tier_name(&self) -> &'static str {
        "durable"
    }

    async fn connect(&self) -> Result<Arc<dyn TownStorePort>, StoreError> {
        tracing::info!(url = %self.url, "Connecting durable tier");
        let store = SqliteTownStore::new(self.url.clone(), self.clock.clone());
        store.connect().await?;
        Ok(Arc::new(store))
    }
}
