//! Redis cluster fast tier.
//!
//! Layout:
//! - `towns` - set of every stored town id
//! - `town:{<id>}` - hash of the town fields
//! - `town:{<id>}:players` - set of member ids
//! - `player:{<id>}` - hash with the player's user name
//!
//! The braces are cluster hash tags, so a town's hash and member set live in
//! the same slot and can be removed with one `DEL`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use towndir_domain::{Player, PlayerId, Town, TownId};

use crate::infrastructure::config::RedisNode;
use crate::infrastructure::ports::{StoreError, TierConnector, TownStorePort};

const BACKEND: &str = "redis";
const TOWNS_KEY: &str = "towns";

fn town_key(id: TownId) -> String {
    format!("town:{{{id}}}")
}

fn town_players_key(id: TownId) -> String {
    format!("town:{{{id}}}:players")
}

fn player_key(id: PlayerId) -> String {
    format!("player:{{{id}}}")
}

fn field<'a>(hash: &'a HashMap<String, String>, name: &str) -> Result<&'a str, StoreError> {
    hash.get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::serialization(format!("town hash missing field '{name}'")))
}

fn number_field(hash: &HashMap<String, String>, name: &str) -> Result<u32, StoreError> {
    field(hash, name)?
        .parse()
        .map_err(|e| StoreError::serialization(format!("{name}: {e}")))
}

/// Rebuild a town from its hash and member set. An empty hash means absent.
fn town_from_hash(
    id: TownId,
    hash: &HashMap<String, String>,
    members: Vec<String>,
) -> Result<Option<Town>, StoreError> {
    if hash.is_empty() {
        return Ok(None);
    }
    let is_public = match field(hash, "isPubliclyListed")? {
        "true" => true,
        "false" => false,
        other => {
            return Err(StoreError::serialization(format!(
                "isPubliclyListed: expected true/false, got '{other}'"
            )))
        }
    };
    let players = members
        .iter()
        .map(|raw| raw.parse::<PlayerId>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::serialization)?;

    Ok(Some(Town {
        id,
        friendly_name: field(hash, "friendlyName")?.to_string(),
        update_password: field(hash, "townUpdatePassword")?.to_string(),
        is_publicly_listed: is_public,
        occupancy: number_field(hash, "occupancy")?,
        capacity: number_field(hash, "capacity")?,
        players,
    }))
}

fn town_fields(town: &Town) -> Vec<(&'static str, String)> {
    vec![
        ("friendlyName", town.friendly_name.clone()),
        ("isPubliclyListed", town.is_publicly_listed.to_string()),
        ("capacity", town.capacity.to_string()),
        ("occupancy", town.occupancy.to_string()),
        ("townUpdatePassword", town.update_password.clone()),
    ]
}

/// Replace a town's hash and member set in one `MULTI`/`EXEC`.
///
/// Every key shares the town's hash tag, so the transaction stays on one slot.
fn town_write_pipeline(town: &Town) -> redis::Pipeline {
    let players_key = town_players_key(town.id);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hset_multiple(town_key(town.id), town_fields(town).as_slice())
        .ignore()
        .del(&players_key)
        .ignore();
    if !town.players.is_empty() {
        let members: Vec<String> = town.players.iter().map(ToString::to_string).collect();
        pipe.sadd(&players_key, members).ignore();
    }
    pipe
}

/// Redis cluster implementation of the fast tier.
pub struct RedisTownStore {
    nodes: Vec<RedisNode>,
    connection: OnceCell<ClusterConnection>,
}

impl RedisTownStore {
    pub fn new(nodes: Vec<RedisNode>) -> Self {
        Self {
            nodes,
            connection: OnceCell::new(),
        }
    }

    /// Connect to the cluster and `PING` it.
    pub async fn connect(&self) -> Result<(), StoreError> {
        self.connection
            .get_or_try_init(|| async {
                let urls: Vec<String> = self.nodes.iter().map(RedisNode::url).collect();
                let client = ClusterClient::new(urls)
                    .map_err(|e| StoreError::connection(BACKEND, e))?;
                let mut conn = client
                    .get_async_connection()
                    .await
                    .map_err(|e| StoreError::connection(BACKEND, e))?;
                let _: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::connection(BACKEND, e))?;
                Ok::<_, StoreError>(conn)
            })
            .await?;
        Ok(())
    }

    fn connection(&self) -> Result<ClusterConnection, StoreError> {
        self.connection
            .get()
            .cloned()
            .ok_or_else(|| StoreError::not_ready(BACKEND))
    }

    async fn read_town(
        &self,
        conn: &mut ClusterConnection,
        id: TownId,
    ) -> Result<Option<Town>, StoreError> {
        let hash: HashMap<String, String> = conn
            .hgetall(town_key(id))
            .await
            .map_err(|e| StoreError::database("get_town", e))?;
        if hash.is_empty() {
            return Ok(None);
        }
        let members: Vec<String> = conn
            .smembers(town_players_key(id))
            .await
            .map_err(|e| StoreError::database("get_town", e))?;
        town_from_hash(id, &hash, members)
    }
}

#[async_trait]
impl TownStorePort for RedisTownStore {
    async fn save_town(&self, town: &Town) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = conn
            .sadd(TOWNS_KEY, town.id.to_string())
            .await
            .map_err(|e| StoreError::database("save_town", e))?;
        let _: () = town_write_pipeline(town)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::database("save_town", e))?;
        Ok(())
    }

    async fn get_town(&self, id: TownId) -> Result<Option<Town>, StoreError> {
        let mut conn = self.connection()?;
        self.read_town(&mut conn, id).await
    }

    async fn list_towns(&self) -> Result<Vec<Town>, StoreError> {
        let mut conn = self.connection()?;
        let ids: Vec<String> = conn
            .smembers(TOWNS_KEY)
            .await
            .map_err(|e| StoreError::database("list_towns", e))?;

        let mut towns = Vec::with_capacity(ids.len());
        for raw in ids {
            let id: TownId = raw.parse().map_err(StoreError::serialization)?;
            // Index entries can outlive their hash; skip those.
            if let Some(town) = self.read_town(&mut conn, id).await? {
                towns.push(town);
            }
        }
        Ok(towns)
    }

    async fn delete_town(&self, id: TownId) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = conn
            .del(vec![town_key(id), town_players_key(id)])
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        let _: () = conn
            .srem(TOWNS_KEY, id.to_string())
            .await
            .map_err(|e| StoreError::database("delete_town", e))?;
        Ok(())
    }

    async fn add_player_to_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let known: bool = conn
            .sismember(TOWNS_KEY, town_id.to_string())
            .await
            .map_err(|e| StoreError::database("add_player_to_town", e))?;
        if !known {
            return Ok(());
        }
        let _: () = conn
            .sadd(town_players_key(town_id), player_id.to_string())
            .await
            .map_err(|e| StoreError::database("add_player_to_town", e))?;
        Ok(())
    }

    async fn remove_player_from_town(
        &self,
        player_id: PlayerId,
        town_id: TownId,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = conn
            .srem(town_players_key(town_id), player_id.to_string())
            .await
            .map_err(|e| StoreError::database("remove_player_from_town", e))?;
        Ok(())
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = conn
            .hset(player_key(player.id), "username", &player.user_name)
            .await
            .map_err(|e| StoreError::database("save_player", e))?;
        Ok(())
    }
}

/// Fast tier connector: opens a fresh cluster connection on every attempt.
pub struct RedisConnector {
    nodes: Vec<RedisNode>,
}

impl RedisConnector {
    pub fn new(nodes: Vec<RedisNode>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl TierConnector for RedisConnector {
    fn tier_name(&self) -> &'static str {
        "fast"
    }

    async fn connect(&self) -> Result<Arc<dyn TownStorePort>, StoreError> {
        tracing::info!(nodes = ?self.nodes, "Connecting fast tier");
        let store = RedisTownStore::new(self.nodes.clone());
        store.connect().await?;
        Ok(Arc::new(store))
    }
}
