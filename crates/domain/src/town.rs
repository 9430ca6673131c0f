//! Town directory records.
//!
//! `Town` is the persisted shape of one live town; `TownListing` is the only
//! projection handed to directory consumers and never carries the password.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::{PlayerId, TownId};

/// Persisted state of a town.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Town {
    pub id: TownId,
    pub friendly_name: String,
    pub update_password: String,
    pub is_publicly_listed: bool,
    pub occupancy: u32,
    pub capacity: u32,
    /// Member ids, kept free of duplicates. Not bounded by `capacity`.
    pub players: Vec<PlayerId>,
}

impl Town {
    pub fn new(
        id: TownId,
        friendly_name: impl Into<String>,
        update_password: impl Into<String>,
        is_publicly_listed: bool,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            friendly_name: friendly_name.into(),
            update_password: update_password.into(),
            is_publicly_listed,
            occupancy: 0,
            capacity,
            players: Vec::new(),
        }
    }

    pub fn with_players(mut self, players: impl IntoIterator<Item = PlayerId>) -> Self {
        self.players.clear();
        for player in players {
            self.add_player(player);
        }
        self.occupancy = u32::try_from(self.players.len()).unwrap_or(u32::MAX);
        self
    }

    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.players.contains(&player_id)
    }

    /// Returns `false` if the player was already a member.
    pub fn add_player(&mut self, player_id: PlayerId) -> bool {
        if self.has_player(player_id) {
            return false;
        }
        self.players.push(player_id);
        true
    }

    /// Returns `false` if the player was not a member.
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        let before = self.players.len();
        self.players.retain(|id| *id != player_id);
        self.players.len() != before
    }

    /// Project into the public directory shape.
    pub fn listing(&self) -> TownListing {
        TownListing {
            id: self.id,
            friendly_name: self.friendly_name.clone(),
            current_occupancy: self.occupancy,
            maximum_occupancy: self.capacity,
        }
    }

    /// A replacement name must be non-empty. Whitespace-only names are accepted.
    pub fn validate_friendly_name(name: &str) -> Result<(), DomainError> {
        if name.is_empty() {
            return Err(DomainError::validation("Town name cannot be empty"));
        }
        Ok(())
    }
}

/// A player identity, stored independently of any town.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub user_name: String,
}

impl Player {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            id: PlayerId::new(),
            user_name: user_name.into(),
        }
    }

    pub fn with_id(mut self, id: PlayerId) -> Self {
        self.id = id;
        self
    }
}

/// Directory entry for a publicly listed town.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TownListing {
    pub id: TownId,
    pub friendly_name: String,
    pub current_occupancy: u32,
    pub maximum_occupancy: u32,
}
