// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Typed messages the bridge submits to the consensus chain.
//!
//! Every event-derived message carries the submitter address and the
//! originating `(tx_hash, log_index)`; the consensus chain deduplicates on
//! that pair, which is what makes at-least-once delivery safe.

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeMsg {
    /// Acknowledge a checkpoint observed on the root-chain contract.
    /// Decider-originated acks carry a zero tx hash and log index.
    CheckpointAck {
        from: Address,
        header_block_id: u64,
        tx_hash: H256,
        log_index: u64,
    },
    /// Propose a new checkpoint of child-chain blocks `[start_block, end_block]`.
    Checkpoint {
        proposer: Address,
        start_block: u64,
        end_block: u64,
        root_hash: H256,
    },
    ValidatorJoin {
        from: Address,
        validator_id: u64,
        signer_pub_key: Bytes,
        tx_hash: H256,
        log_index: u64,
    },
    ValidatorExit {
        from: Address,
        validator_id: u64,
        tx_hash: H256,
        log_index: u64,
    },
    StakeUpdate {
        from: Address,
        validator_id: u64,
        tx_hash: H256,
        log_index: u64,
    },
    SignerUpdate {
        from: Address,
        validator_id: u64,
        new_signer_pub_key: Bytes,
        tx_hash: H256,
        log_index: u64,
    },
    /// Record of a state-sync event, addressed to the child chain.
    EventRecord {
        from: Address,
        id: u64,
        chain_id: String,
        tx_hash: H256,
        log_index: u64,
    },
    Topup {
        from: Address,
        validator_id: u64,
        tx_hash: H256,
        log_index: u64,
    },
    ProposeSpan {
        span_id: u64,
        proposer: Address,
        start_block: u64,
        end_block: u64,
        chain_id: String,
    },
}

impl BridgeMsg {
    /// Short name for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMsg::CheckpointAck { .. } => "checkpoint_ack",
            BridgeMsg::Checkpoint { .. } => "checkpoint",
            BridgeMsg::ValidatorJoin { .. } => "validator_join",
            BridgeMsg::ValidatorExit { .. } => "validator_exit",
            BridgeMsg::StakeUpdate { .. } => "stake_update",
            BridgeMsg::SignerUpdate { .. } => "signer_update",
            BridgeMsg::EventRecord { .. } => "event_record",
            BridgeMsg::Topup { .. } => "topup",
            BridgeMsg::ProposeSpan { .. } => "propose_span",
        }
    }

    /// Canonical body over which the broadcast signature is computed.
    pub fn sign_bytes(&self) -> BridgeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Decode {
            event: self.kind().to_string(),
            msg: e.to_string(),
        })
    }
}

/// A signed message as framed for `broadcast_tx_sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMsg {
    pub msg: BridgeMsg,
    pub signature: Bytes,
    pub signer: Address,
}

impl SignedMsg {
    pub fn to_tx_bytes(&self) -> BridgeResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BridgeError::Generic(format!("failed to frame signed msg: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_bytes_is_deterministic() {
        let msg = BridgeMsg::CheckpointAck {
            from: Address::repeat_byte(0x11),
            header_block_id: 10000,
            tx_hash: H256::repeat_byte(0xaa),
            log_index: 3,
        };
        assert_eq!(msg.sign_bytes().unwrap(), msg.sign_bytes().unwrap());
    }

    #[test]
    fn test_msg_roundtrip_keeps_dedup_key() {
        let msg = BridgeMsg::EventRecord {
            from: Address::repeat_byte(0x22),
            id: 42,
            chain_id: "15001".to_string(),
            tx_hash: H256::repeat_byte(0xbb),
            log_index: 9,
        };
        let bytes = msg.sign_bytes().unwrap();
        let back: BridgeMsg = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_kind_labels() {
        let msg = BridgeMsg::ProposeSpan {
            span_id: 6,
            proposer: Address::zero(),
            start_block: 2000,
            end_block: 2999,
            chain_id: "15001".to_string(),
        };
        assert_eq!(msg.kind(), "propose_span");
    }
}
