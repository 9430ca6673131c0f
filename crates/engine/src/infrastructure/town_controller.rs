//! Default in-process town controller.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use towndir_domain::{Player, PlayerId, Town, TownId};

use crate::infrastructure::ports::{
    RandomPort, TownController, TownControllerFactory, TownListener,
};

/// Seats per town. Informational only; joins are not refused when full.
pub const DEFAULT_TOWN_CAPACITY: u32 = 50;

const PASSWORD_LEN: usize = 24;
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

struct TownState {
    friendly_name: String,
    is_publicly_listed: bool,
    players: Vec<Player>,
}

pub struct LiveTownController {
    id: TownId,
    update_password: String,
    capacity: u32,
    state: RwLock<TownState>,
    listeners: RwLock<Vec<Arc<dyn TownListener>>>,
}

impl LiveTownController {
    pub fn new(
        id: TownId,
        update_password: String,
        friendly_name: impl Into<String>,
        is_publicly_listed: bool,
    ) -> Self {
        Self {
            id,
            update_password,
            capacity: DEFAULT_TOWN_CAPACITY,
            state: RwLock::new(TownState {
                friendly_name: friendly_name.into(),
                is_publicly_listed,
                players: Vec::new(),
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener for town-destroyed notifications.
    pub async fn add_listener(&self, listener: Arc<dyn TownListener>) {
        self.listeners.write().await.push(listener);
    }
}

#[async_trait]
impl TownController for LiveTownController {
    fn town_id(&self) -> TownId {
        self.id
    }

    fn update_password(&self) -> &str {
        &self.update_password
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    async fn friendly_name(&self) -> String {
        self.state.read().await.friendly_name.clone()
    }

    async fn set_friendly_name(&self, name: String) {
        self.state.write().await.friendly_name = name;
    }

    async fn is_publicly_listed(&self) -> bool {
        self.state.read().await.is_publicly_listed
    }

    async fn set_publicly_listed(&self, is_public: bool) {
        self.state.write().await.is_publicly_listed = is_public;
    }

    async fn occupancy(&self) -> u32 {
        u32::try_from(self.state.read().await.players.len()).unwrap_or(u32::MAX)
    }

    async fn add_player(&self, player: Player) -> bool {
        let mut state = self.state.write().await;
        if state.players.iter().any(|p| p.id == player.id) {
            return false;
        }
        tracing::debug!(town_id = %self.id, player_id = %player.id, "Player joined town");
        state.players.push(player);
        true
    }

    async fn remove_player(&self, player_id: PlayerId) -> bool {
        let mut state = self.state.write().await;
        let before = state.players.len();
        state.players.retain(|p| p.id != player_id);
        let removed = state.players.len() != before;
        if removed {
            tracing::debug!(town_id = %self.id, player_id = %player_id, "Player left town");
        }
        removed
    }

    async fn disconnect_all_players(&self) {
        let dropped = {
            let mut state = self.state.write().await;
            std::mem::take(&mut state.players).len()
        };
        let listeners = std::mem::take(&mut *self.listeners.write().await);
        tracing::info!(
            town_id = %self.id,
            players = dropped,
            listeners = listeners.len(),
            "Disconnecting all players"
        );
        for listener in listeners {
            listener.on_town_destroyed();
        }
    }

    async fn to_town(&self) -> Town {
        let state = self.state.read().await;
        Town::new(
            self.id,
            state.friendly_name.clone(),
            self.update_password.clone(),
            state.is_publicly_listed,
            self.capacity,
        )
        .with_players(state.players.iter().map(|p| p.id))
    }
}

/// Creates `LiveTownController`s with fresh ids and passwords.
pub struct LiveTownControllerFactory {
    random: Arc<dyn RandomPort>,
}

impl LiveTownControllerFactory {
    pub fn new(random: Arc<dyn RandomPort>) -> Self {
        Self { random }
    }

    fn generate_password(&self) -> String {
        let last = i32::try_from(PASSWORD_ALPHABET.len() - 1).unwrap_or(i32::MAX);
        (0..PASSWORD_LEN)
            .map(|_| {
                let idx = usize::try_from(self.random.gen_range(0, last)).unwrap_or(0);
                char::from(PASSWORD_ALPHABET[idx.min(PASSWORD_ALPHABET.len() - 1)])
            })
            .collect()
    }
}

impl TownControllerFactory for LiveTownControllerFactory {
    fn create(&self, friendly_name: &str, is_publicly_listed: bool) -> Arc<dyn TownController> {
        let id = TownId::from_uuid(self.random.gen_uuid());
        let password = self.generate_password();
        Arc::new(LiveTownController::new(
            id,
            password,
            friendly_name,
            is_publicly_listed,
        ))
    }
}
