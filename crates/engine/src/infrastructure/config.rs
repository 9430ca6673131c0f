//! Environment-driven configuration.
//!
//! Values come from the process environment after `.env` files have been
//! loaded (see `main`). `from_lookup` takes any key lookup so tests do not
//! have to mutate the real environment.

use std::fmt;

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// One node of the fast-tier cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisNode {
    pub host: String,
    pub port: u16,
}

impl RedisNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for RedisNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where towns are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// SQLite durable tier plus a three-node Redis cluster fast tier.
    Cluster {
        durable_url: String,
        fast_nodes: Vec<RedisNode>,
    },
    /// Both tiers held in process. Nothing survives a restart.
    Memory,
}

/// Master override for town passwords.
///
/// The override is switched on by `MASTER_TOWN_PASSWORD`, but the value a
/// caller must supply is read from `MASTER_TOWN_PASWORD`. With only the first
/// variable set the override can never match. Empty values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPassword {
    pub enabled_by: Option<String>,
    pub compared_value: Option<String>,
}

impl MasterPassword {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn matches(&self, provided: &str) -> bool {
        let enabled = self.enabled_by.as_deref().is_some_and(|v| !v.is_empty());
        enabled
            && !provided.is_empty()
            && self.compared_value.as_deref() == Some(provided)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub master_password: MasterPassword,
    /// Write durable-tier fallback reads back into the fast tier.
    pub backfill_on_miss: bool,
}

const FAST_NODE_KEYS: [(&str, &str); 3] = [
    ("REDIS_NODE1", "REDIS_NODE1_PORT"),
    ("REDIS_NODE2", "REDIS_NODE2_PORT"),
    ("REDIS_NODE3", "REDIS_NODE3_PORT"),
];

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let storage = match get("STORAGE_MODE").as_deref() {
            None | Some("cluster") => {
                let durable_url = get("DURABLE_DB_URL").ok_or(ConfigError::Missing("DURABLE_DB_URL"))?;
                let mut fast_nodes = Vec::with_capacity(FAST_NODE_KEYS.len());
                for (host_key, port_key) in FAST_NODE_KEYS {
                    let host = get(host_key).ok_or(ConfigError::Missing(host_key))?;
                    let port = get(port_key)
                        .ok_or(ConfigError::Missing(port_key))?
                        .parse::<u16>()
                        .map_err(|e| ConfigError::Invalid {
                            key: port_key,
                            message: e.to_string(),
                        })?;
                    fast_nodes.push(RedisNode::new(host, port));
                }
                StorageConfig::Cluster {
                    durable_url,
                    fast_nodes,
                }
            }
            Some("memory") => StorageConfig::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_MODE",
                    message: format!("expected 'cluster' or 'memory', got '{other}'"),
                })
            }
        };

        let backfill_on_miss = match get("TIER_BACKFILL").as_deref() {
            None => true,
            Some(raw) => parse_bool(raw).ok_or_else(|| ConfigError::Invalid {
                key: "TIER_BACKFILL",
                message: format!("expected true/false, got '{raw}'"),
            })?,
        };

        Ok(Self {
            storage,
            master_password: MasterPassword {
                enabled_by: get("MASTER_TOWN_PASSWORD"),
                compared_value: get("MASTER_TOWN_PASWORD"),
            },
            backfill_on_miss,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn cluster_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DURABLE_DB_URL", "sqlite:towns.db?mode=rwc"),
            ("REDIS_NODE1", "10.0.0.1"),
            ("REDIS_NODE1_PORT", "7000"),
            ("REDIS_NODE2", "10.0.0.2"),
            ("REDIS_NODE2_PORT", "7001"),
            ("REDIS_NODE3", "10.0.0.3"),
            ("REDIS_NODE3_PORT", "7002"),
        ]
    }

    #[test]
    fn cluster_mode_reads_all_three_nodes() {
        let config = AppConfig::from_lookup(lookup_from(&cluster_env())).expect("config");
        match config.storage {
            StorageConfig::Cluster {
                durable_url,
                fast_nodes,
            } => {
                assert_eq!(durable_url, "sqlite:towns.db?mode=rwc");
                assert_eq!(fast_nodes.len(), 3);
                assert_eq!(fast_nodes[2], RedisNode::new("10.0.0.3", 7002));
                assert_eq!(fast_nodes[0].url(), "redis://10.0.0.1:7000/");
            }
            StorageConfig::Memory => panic!("expected cluster storage"),
        }
        assert!(config.backfill_on_miss);
        assert_eq!(config.master_password, MasterPassword::disabled());
    }

    #[test]
    fn missing_node_is_reported_by_name() {
        let env: Vec<_> = cluster_env()
            .into_iter()
            .filter(|(k, _)| *k != "REDIS_NODE2_PORT")
            .collect();
        let err = AppConfig::from_lookup(lookup_from(&env)).expect_err("should fail");
        assert_eq!(err, ConfigError::Missing("REDIS_NODE2_PORT"));
    }

    #[test]
    fn bad_port_is_invalid() {
        let mut env = cluster_env();
        env.push(("REDIS_NODE1_PORT", "seventy"));
        let err = AppConfig::from_lookup(lookup_from(&env)).expect_err("should fail");
        assert!(matches!(err, ConfigError::Invalid { key: "REDIS_NODE1_PORT", .. }));
    }

    #[test]
    fn memory_mode_needs_no_connection_settings() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("STORAGE_MODE", "memory"),
            ("TIER_BACKFILL", "off"),
        ]))
        .expect("config");
        assert_eq!(config.storage, StorageConfig::Memory);
        assert!(!config.backfill_on_miss);
    }

    #[test]
    fn master_override_reads_the_misspelled_variable() {
        let only_documented = MasterPassword {
            enabled_by: Some("hunter2".to_string()),
            compared_value: None,
        };
        assert!(!only_documented.matches("hunter2"));

        let config = AppConfig::from_lookup(lookup_from(&[
            ("STORAGE_MODE", "memory"),
            ("MASTER_TOWN_PASSWORD", "anything"),
            ("MASTER_TOWN_PASWORD", "hunter2"),
        ]))
        .expect("config");
        assert!(config.master_password.matches("hunter2"));
        assert!(!config.master_password.matches("anything"));
    }

    #[test]
    fn blank_master_variables_leave_the_override_disabled() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("STORAGE_MODE", "memory"),
            ("MASTER_TOWN_PASSWORD", ""),
            ("MASTER_TOWN_PASWORD", "  "),
        ]))
        .expect("config");

        assert_eq!(config.master_password, MasterPassword::disabled());
        assert!(!config.master_password.matches(""));
        assert!(!config.master_password.matches("  "));
    }

    #[test]
    fn empty_override_value_never_matches() {
        let master = MasterPassword {
            enabled_by: Some("on".to_string()),
            compared_value: Some(String::new()),
        };
        assert!(!master.matches(""));
    }
}
