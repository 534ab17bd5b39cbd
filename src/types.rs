// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// Light header kept in the confirmation queue. Created on header arrival,
/// dropped when dequeued as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightHeader {
    pub number: u64,
    /// Unix seconds
    pub time: u64,
}

/// A contiguous, confirmed range of main-chain blocks to scan for logs.
/// Invariant: `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub from: u64,
    pub to: u64,
}

/// Checkpoint head as reported by the root-chain contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCheckpoint {
    pub start: u64,
    pub end: u64,
    pub current_header_block: u64,
    /// Unix seconds of the last checkpoint submission
    pub timestamp: u64,
    pub root: H256,
}

/// The consensus chain's view of a checkpoint, buffered or committed.
/// `found == false` means the endpoint had nothing (e.g. buffer 404).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeimdallCheckpoint {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
    #[serde(default)]
    pub found: bool,
}

impl HeimdallCheckpoint {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            found: true,
        }
    }

    pub fn not_found() -> Self {
        Self {
            start: 0,
            end: 0,
            found: false,
        }
    }
}

/// Checkpoint as serialized on the consensus chain's REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointBlockHeader {
    #[serde(default)]
    pub proposer: Option<Address>,
    pub start_block: u64,
    pub end_block: u64,
    #[serde(default)]
    pub root_hash: Option<H256>,
    #[serde(default)]
    pub timestamp: u64,
}

/// A contiguous range of child-chain blocks assigned to a producer committee.
/// The next span's `start_block` is always `end_block + 1` of this one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Span {
    #[serde(rename = "span_id", alias = "id")]
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
    #[serde(default)]
    pub chain_id: String,
}

/// Validator as serialized on the consensus chain's REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidatorInfo {
    #[serde(rename = "ID", alias = "id", default)]
    pub id: u64,
    pub signer: Address,
    #[serde(default)]
    pub power: u64,
}

/// Next-span parameters as served by the consensus chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NextSpanInfo {
    pub start_block: u64,
    pub end_block: u64,
    pub chain_id: String,
    pub proposer: Address,
}

/// Every REST response is wrapped as `{ result, height }` with `result`
/// JSON-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseWithHeight {
    pub result: serde_json::Value,
    #[serde(default)]
    pub height: String,
}

/// Outcome of awaiting a consensus-chain commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxCommit {
    pub height: u64,
    pub hash: H256,
}

/// A committed consensus-chain transaction with its merkle proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxProof {
    /// Raw transaction bytes as framed on the wire. The first four bytes are
    /// a length prefix the on-chain verifier rejects; callers strip them.
    pub tx: Vec<u8>,
    /// Sibling hashes in proof order
    pub siblings: Vec<[u8; 32]>,
    pub root: [u8; 32],
}

/// Precommit votes and signatures for a committed height, in the layout the
/// root-chain verifier expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub vote_bytes: Vec<u8>,
    pub sigs: Vec<u8>,
    pub chain_id: String,
}

/// Fields of a child-chain header that feed the checkpoint merkle leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHeaderFields {
    pub number: u64,
    pub time: u64,
    pub tx_root: H256,
    pub receipts_root: H256,
}

/// Process-wide validator identity, loaded once at startup and read-only
/// thereafter. Components receive a shared reference.
#[derive(Debug, Clone)]
pub struct ValidatorIdentity {
    pub address: Address,
    /// Uncompressed secp256k1 public key (65 bytes, 0x04-prefixed)
    pub pub_key: Vec<u8>,
    pub id: u64,
}

impl ValidatorIdentity {
    pub fn from_wallet(wallet: &LocalWallet, id: u64) -> Self {
        use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
        let pub_key = wallet
            .signer()
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self {
            address: wallet.address(),
            pub_key,
            id,
        }
    }
}
