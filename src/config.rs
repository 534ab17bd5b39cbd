// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use ethers::signers::LocalWallet;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::info;

use crate::types::ValidatorIdentity;

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    // Rpc url for the main-chain fullnode
    pub eth_rpc_url: String,
    // Rpc url for the child-chain fullnode
    pub bor_rpc_url: String,
    // REST base url of the consensus chain
    pub heimdall_rest_url: String,
    // RPC url of the consensus chain node
    pub heimdall_rpc_url: String,

    // Watched contracts on the main chain
    pub root_chain_address: String,
    pub staking_info_address: String,
    pub state_sender_address: String,

    // Path of the persistent cursor store
    pub bridge_db_path: PathBuf,
    // Path of the file holding the hex-encoded secp256k1 signing key
    pub signing_key_path: PathBuf,
    pub validator_id: u64,

    /// Seconds a header must age in the buffer before scanning
    #[serde(default = "default_tx_confirmation_time")]
    pub tx_confirmation_time: u64,
    /// Fallback polling cadence when subscription is unavailable
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_syncer_poll_interval")]
    pub syncer_poll_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_checkpointer_poll_interval")]
    pub checkpointer_poll_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_span_poll_interval")]
    pub span_poll_interval: Duration,

    #[serde(default = "default_avg_checkpoint_length")]
    pub avg_checkpoint_length: u64,
    #[serde(default = "default_max_checkpoint_length")]
    pub max_checkpoint_length: u64,
    #[serde(default = "default_child_block_interval")]
    pub child_block_interval: u64,

    /// Child chain identifier embedded in state-sync messages
    #[serde(default = "default_bor_chain_id")]
    pub bor_chain_id: String,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_tx_confirmation_time() -> u64 {
    12
}

fn default_syncer_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_checkpointer_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_span_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_avg_checkpoint_length() -> u64 {
    256
}

fn default_max_checkpoint_length() -> u64 {
    1024
}

fn default_child_block_interval() -> u64 {
    10_000
}

fn default_bor_chain_id() -> String {
    "15001".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

/// Runtime handles derived from a validated config. The process must not
/// start in a half-configured state, so every parse failure here is fatal.
pub struct ValidatedConfig {
    pub wallet: LocalWallet,
    pub identity: ValidatorIdentity,
    pub root_chain_address: Address,
    pub staking_info_address: Address,
    pub state_sender_address: Address,
}

impl BridgeConfig {
    /// Load from YAML or JSON, chosen by file extension.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<ValidatedConfig> {
        info!("starting config validation");

        if self.avg_checkpoint_length == 0 {
            return Err(anyhow!("avg-checkpoint-length must be positive"));
        }
        if self.avg_checkpoint_length > self.max_checkpoint_length {
            return Err(anyhow!(
                "avg-checkpoint-length {} exceeds max-checkpoint-length {}",
                self.avg_checkpoint_length,
                self.max_checkpoint_length
            ));
        }
        if self.child_block_interval == 0 {
            return Err(anyhow!("child-block-interval must be positive"));
        }

        let parse_address = |name: &str, value: &str| {
            value
                .parse::<Address>()
                .map_err(|e| anyhow!("invalid {name} {value:?}: {e}"))
        };
        let root_chain_address = parse_address("root-chain-address", &self.root_chain_address)?;
        let staking_info_address =
            parse_address("staking-info-address", &self.staking_info_address)?;
        let state_sender_address =
            parse_address("state-sender-address", &self.state_sender_address)?;

        let raw_key = std::fs::read_to_string(&self.signing_key_path).with_context(|| {
            format!(
                "failed to read signing key at {}",
                self.signing_key_path.display()
            )
        })?;
        let wallet: LocalWallet = raw_key
            .trim()
            .parse()
            .map_err(|e| anyhow!("signing key is not a valid secp256k1 private key: {e}"))?;

        let identity = ValidatorIdentity::from_wallet(&wallet, self.validator_id);
        info!(address = ?identity.address, validator_id = identity.id, "loaded validator identity");

        Ok(ValidatedConfig {
            wallet,
            identity,
            root_chain_address,
            staking_info_address,
            state_sender_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use std::io::Write;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn key_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{TEST_KEY}").unwrap();
        file
    }

    fn base_config(signing_key_path: PathBuf) -> BridgeConfig {
        BridgeConfig {
            eth_rpc_url: "http://localhost:8545".to_string(),
            bor_rpc_url: "http://localhost:8546".to_string(),
            heimdall_rest_url: "http://localhost:1317".to_string(),
            heimdall_rpc_url: "http://localhost:26657".to_string(),
            root_chain_address: "0x0000000000000000000000000000000000000001".to_string(),
            staking_info_address: "0x0000000000000000000000000000000000000002".to_string(),
            state_sender_address: "0x0000000000000000000000000000000000000003".to_string(),
            bridge_db_path: PathBuf::from("/tmp/bridge-db"),
            signing_key_path,
            validator_id: 3,
            tx_confirmation_time: default_tx_confirmation_time(),
            syncer_poll_interval: default_syncer_poll_interval(),
            checkpointer_poll_interval: default_checkpointer_poll_interval(),
            span_poll_interval: default_span_poll_interval(),
            avg_checkpoint_length: 256,
            max_checkpoint_length: 1024,
            child_block_interval: 10_000,
            bor_chain_id: default_bor_chain_id(),
            metrics_port: default_metrics_port(),
        }
    }

    #[test]
    fn test_validate_happy_path() {
        let key = key_file();
        let config = base_config(key.path().to_path_buf());
        let validated = config.validate().unwrap();
        assert_eq!(validated.identity.id, 3);
        assert_eq!(validated.identity.address, validated.wallet.address());
    }

    #[test]
    fn test_validate_rejects_avg_above_max() {
        let key = key_file();
        let mut config = base_config(key.path().to_path_buf());
        config.avg_checkpoint_length = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let key = key_file();
        let mut config = base_config(key.path().to_path_buf());
        config.root_chain_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_key_file() {
        let mut config = base_config(PathBuf::from("/nonexistent/key"));
        config.signing_key_path = PathBuf::from("/nonexistent/key");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let key = key_file();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "eth-rpc-url: http://localhost:8545\n\
             bor-rpc-url: http://localhost:8546\n\
             heimdall-rest-url: http://localhost:1317\n\
             heimdall-rpc-url: http://localhost:26657\n\
             root-chain-address: '0x0000000000000000000000000000000000000001'\n\
             staking-info-address: '0x0000000000000000000000000000000000000002'\n\
             state-sender-address: '0x0000000000000000000000000000000000000003'\n\
             bridge-db-path: /tmp/bridge-db\n\
             signing-key-path: {}\n\
             validator-id: 3\n\
             span-poll-interval: 10\n",
            key.path().display()
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.validator_id, 3);
        assert_eq!(config.span_poll_interval, Duration::from_secs(10));
        assert_eq!(config.tx_confirmation_time, 12);
        assert_eq!(config.avg_checkpoint_length, 256);
        assert_eq!(config.bor_chain_id, "15001");
    }
}
