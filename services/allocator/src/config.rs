//! Configuration for the allocator.

use std::time::Duration;

use thiserror::Error;

use crate::fleet::{Node, WorkloadDirs};

/// Remote login used when `SSH_USER` is unset.
pub const DEFAULT_SSH_USER: &str = "user01";

/// Errors while loading configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env var is required")]
    Missing(&'static str),

    #[error("{var} has an empty entry at position {index}")]
    EmptyEntry { var: &'static str, index: usize },

    #[error("SSH_PASSWORDS has {passwords} entries but CLUSTER_IPS has {nodes}, they must match")]
    CredentialCount { passwords: usize, nodes: usize },

    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Demand oracle settings.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Base URL queried for both provers.
    pub api_endpoint: String,

    /// Value of the `prover` query parameter for prover 1.
    pub prover1_address: String,

    /// Value of the `prover` query parameter for prover 2.
    pub prover2_address: String,

    /// HTTP client timeout.
    pub timeout: Duration,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Allocator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed nodes, in configured order.
    pub nodes: Vec<Node>,

    /// Remote login principal.
    pub ssh_user: String,

    pub oracle: OracleConfig,

    /// Remote compose project directories.
    pub workload_dirs: WorkloadDirs,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str| lookup(key).filter(|v| !v.is_empty());

        let ips = var("CLUSTER_IPS").ok_or(ConfigError::Missing("CLUSTER_IPS"))?;
        let addresses = split_list(&ips);
        if let Some(index) = addresses.iter().position(|a| a.is_empty()) {
            return Err(ConfigError::EmptyEntry {
                var: "CLUSTER_IPS",
                index,
            });
        }

        let credentials: Vec<Option<String>> = match var("SSH_PASSWORDS") {
            Some(raw) => {
                let list = split_list(&raw);
                if list.len() != addresses.len() {
                    return Err(ConfigError::CredentialCount {
                        passwords: list.len(),
                        nodes: addresses.len(),
                    });
                }
                list.into_iter().map(Some).collect()
            }
            None => vec![None; addresses.len()],
        };

        let nodes = addresses
            .into_iter()
            .zip(credentials)
            .map(|(address, credential)| {
                let node = Node::new(address);
                match credential {
                    Some(c) if !c.is_empty() => node.with_credential(c),
                    _ => node,
                }
            })
            .collect();

        let api_endpoint = var("API_ENDPOINT").ok_or(ConfigError::Missing("API_ENDPOINT"))?;
        let prover1_address =
            var("PROVER1_ADDRESS").ok_or(ConfigError::Missing("PROVER1_ADDRESS"))?;
        let prover2_address =
            var("PROVER2_ADDRESS").ok_or(ConfigError::Missing("PROVER2_ADDRESS"))?;

        let timeout_secs = match var("ORACLE_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: "ORACLE_TIMEOUT_SECS",
                    value,
                })?,
            None => 30,
        };

        let ssh_user = var("SSH_USER").unwrap_or_else(|| DEFAULT_SSH_USER.to_string());

        let log_format = match var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            nodes,
            ssh_user,
            oracle: OracleConfig {
                api_endpoint,
                prover1_address,
                prover2_address,
                timeout: Duration::from_secs(timeout_secs),
            },
            workload_dirs: WorkloadDirs::default(),
            log_format,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).collect()
}
