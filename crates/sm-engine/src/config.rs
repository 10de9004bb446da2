//! Engine configuration with environment overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_GRAPHQL_GATEWAYS: &[&str] = &[
    "https://arweave.net/graphql",
    "https://arweave-search.goldsky.com/graphql",
];
pub const DEFAULT_DATA_GATEWAYS: &[&str] = &["https://arweave.net"];

pub const MAINNET_BUNDLER: &str = "https://node2.irys.xyz";
pub const TESTNET_BUNDLER: &str = "https://devnet.irys.xyz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory, `$SHARME_HOME` (default `~/.sharme`).
    pub home: PathBuf,
    #[serde(default)]
    pub gateways: GatewayConfig,
    /// Route uploads to the testnet bundler.
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Ordered gateway endpoint lists; earlier entries are tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub graphql: Vec<String>,
    pub data: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            graphql: DEFAULT_GRAPHQL_GATEWAYS.iter().map(|s| s.to_string()).collect(),
            data: DEFAULT_DATA_GATEWAYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between fact-push ticks in seconds.
    pub push_interval_secs: u64,
    /// Interval between conversation-watch ticks in seconds.
    pub conversation_interval_secs: u64,
    /// Per-request network timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_interval_secs: 60,
            conversation_interval_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            gateways: GatewayConfig::default(),
            testnet: false,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from the environment: `SHARME_HOME`,
    /// `SHARME_ARWEAVE_GQLS`, `SHARME_ARWEAVE_DATAS` (comma-separated,
    /// trailing slashes stripped, empty falls back to defaults), and
    /// `SHARME_TESTNET=true`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(home) = std::env::var("SHARME_HOME") {
            if !home.trim().is_empty() {
                config.home = PathBuf::from(home);
            }
        }
        if let Some(list) = env_endpoint_list("SHARME_ARWEAVE_GQLS") {
            config.gateways.graphql = list;
        }
        if let Some(list) = env_endpoint_list("SHARME_ARWEAVE_DATAS") {
            config.gateways.data = list;
        }
        config.testnet = std::env::var("SHARME_TESTNET")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        config
    }

    /// Upload endpoint for the configured network.
    pub fn bundler_endpoint(&self) -> &'static str {
        if self.testnet {
            TESTNET_BUNDLER
        } else {
            MAINNET_BUNDLER
        }
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".sharme")
}

fn env_endpoint_list(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let list = parse_endpoint_list(&raw);
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Split a comma-separated endpoint list, trimming whitespace and trailing
/// slashes, dropping empty entries.
pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_list_parsing_strips_slashes_and_empties() {
        let list = parse_endpoint_list(" https://a.example/ ,, https://b.example/graphql/ ");
        assert_eq!(list, vec!["https://a.example", "https://b.example/graphql"]);
        assert!(parse_endpoint_list("  ,  ").is_empty());
    }

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(!config.testnet);
        assert_eq!(config.sync.push_interval_secs, 60);
        assert_eq!(config.sync.conversation_interval_secs, 30);
        assert!(!config.gateways.graphql.is_empty());
        assert_eq!(config.bundler_endpoint(), MAINNET_BUNDLER);
    }

    #[test]
    fn testnet_switch_routes_bundler() {
        let config = EngineConfig {
            testnet: true,
            ..Default::default()
        };
        assert_eq!(config.bundler_endpoint(), TESTNET_BUNDLER);
    }
}
