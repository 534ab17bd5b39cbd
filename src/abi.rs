// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Event descriptors for the watched root-chain contracts.
//!
//! The daemon recognizes a fixed set of events across three contracts. A
//! selector table (`topic0 -> (contract, kind)`) is precomputed at startup;
//! unknown topics drop silently. Lookup walks the contracts in a fixed order
//! (RootChain, StateSender, StakingInfo) and the first table containing the
//! selector wins.

use std::collections::HashMap;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeContract {
    RootChain,
    StateSender,
    StakingInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewHeaderBlock,
    Staked,
    UnstakeInit,
    StakeUpdate,
    SignerChange,
    ReStaked,
    Jailed,
    StateSynced,
    TopUpFee,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NewHeaderBlock => "NewHeaderBlock",
            EventKind::Staked => "Staked",
            EventKind::UnstakeInit => "UnstakeInit",
            EventKind::StakeUpdate => "StakeUpdate",
            EventKind::SignerChange => "SignerChange",
            EventKind::ReStaked => "ReStaked",
            EventKind::Jailed => "Jailed",
            EventKind::StateSynced => "StateSynced",
            EventKind::TopUpFee => "TopUpFee",
        }
    }

    /// Solidity signature the selector is derived from.
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::NewHeaderBlock => {
                "NewHeaderBlock(address,uint256,uint256,uint256,uint256,bytes32)"
            }
            EventKind::Staked => "Staked(address,uint256,uint256,uint256,uint256)",
            EventKind::UnstakeInit => "UnstakeInit(address,uint256,uint256,uint256)",
            EventKind::StakeUpdate => "StakeUpdate(uint256,uint256)",
            EventKind::SignerChange => "SignerChange(uint256,address,address)",
            EventKind::ReStaked => "ReStaked(uint256,uint256,uint256)",
            EventKind::Jailed => "Jailed(uint256,uint256)",
            EventKind::StateSynced => "StateSynced(uint256,address,bytes)",
            EventKind::TopUpFee => "TopUpFee(uint256,uint256)",
        }
    }

    pub fn selector(&self) -> H256 {
        H256::from(keccak256(self.signature().as_bytes()))
    }
}

/// A log decoded into one of the recognized event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    NewHeaderBlock {
        proposer: Address,
        header_block_id: u64,
        reward: U256,
        start: u64,
        end: u64,
        root: H256,
    },
    Staked {
        signer: Address,
        validator_id: u64,
        activation_epoch: u64,
        amount: U256,
        total: U256,
    },
    UnstakeInit {
        user: Address,
        validator_id: u64,
        deactivation_epoch: u64,
        amount: U256,
    },
    StakeUpdate {
        validator_id: u64,
        new_amount: U256,
    },
    SignerChange {
        validator_id: u64,
        old_signer: Address,
        new_signer: Address,
    },
    ReStaked {
        validator_id: u64,
        amount: U256,
        total: U256,
    },
    Jailed {
        validator_id: u64,
        exit_epoch: u64,
    },
    StateSynced {
        id: u64,
        contract_address: Address,
        data: Vec<u8>,
    },
    TopUpFee {
        validator_id: u64,
        fee: U256,
    },
}

impl DecodedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DecodedEvent::NewHeaderBlock { .. } => EventKind::NewHeaderBlock,
            DecodedEvent::Staked { .. } => EventKind::Staked,
            DecodedEvent::UnstakeInit { .. } => EventKind::UnstakeInit,
            DecodedEvent::StakeUpdate { .. } => EventKind::StakeUpdate,
            DecodedEvent::SignerChange { .. } => EventKind::SignerChange,
            DecodedEvent::ReStaked { .. } => EventKind::ReStaked,
            DecodedEvent::Jailed { .. } => EventKind::Jailed,
            DecodedEvent::StateSynced { .. } => EventKind::StateSynced,
            DecodedEvent::TopUpFee { .. } => EventKind::TopUpFee,
        }
    }
}

const ROOT_CHAIN_EVENTS: &[EventKind] = &[EventKind::NewHeaderBlock];
const STATE_SENDER_EVENTS: &[EventKind] = &[EventKind::StateSynced];
const STAKING_INFO_EVENTS: &[EventKind] = &[
    EventKind::Staked,
    EventKind::UnstakeInit,
    EventKind::StakeUpdate,
    EventKind::SignerChange,
    EventKind::ReStaked,
    EventKind::Jailed,
    EventKind::TopUpFee,
];

pub struct EventRegistry {
    tables: Vec<(BridgeContract, HashMap<H256, EventKind>)>,
}

impl EventRegistry {
    pub fn new() -> Self {
        let table = |kinds: &[EventKind]| {
            kinds
                .iter()
                .map(|k| (k.selector(), *k))
                .collect::<HashMap<_, _>>()
        };
        Self {
            tables: vec![
                (BridgeContract::RootChain, table(ROOT_CHAIN_EVENTS)),
                (BridgeContract::StateSender, table(STATE_SENDER_EVENTS)),
                (BridgeContract::StakingInfo, table(STAKING_INFO_EVENTS)),
            ],
        }
    }

    /// First contract table containing the selector wins.
    pub fn lookup(&self, topic0: &H256) -> Option<(BridgeContract, EventKind)> {
        for (contract, table) in &self.tables {
            if let Some(kind) = table.get(topic0) {
                return Some((*contract, *kind));
            }
        }
        None
    }

    pub fn decode(&self, kind: EventKind, log: &Log) -> BridgeResult<DecodedEvent> {
        decode_event(kind, log)
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_err(kind: EventKind, msg: impl Into<String>) -> BridgeError {
    BridgeError::Decode {
        event: kind.name().to_string(),
        msg: msg.into(),
    }
}

fn topic_address(log: &Log, idx: usize, kind: EventKind) -> BridgeResult<Address> {
    let topic = log
        .topics
        .get(idx)
        .ok_or_else(|| decode_err(kind, format!("missing topic {idx}")))?;
    Ok(Address::from_slice(&topic.as_bytes()[12..]))
}

fn topic_u64(log: &Log, idx: usize, kind: EventKind) -> BridgeResult<u64> {
    let topic = log
        .topics
        .get(idx)
        .ok_or_else(|| decode_err(kind, format!("missing topic {idx}")))?;
    let value = U256::from_big_endian(topic.as_bytes());
    u256_to_u64(value, kind)
}

fn topic_u256(log: &Log, idx: usize, kind: EventKind) -> BridgeResult<U256> {
    let topic = log
        .topics
        .get(idx)
        .ok_or_else(|| decode_err(kind, format!("missing topic {idx}")))?;
    Ok(U256::from_big_endian(topic.as_bytes()))
}

fn u256_to_u64(value: U256, kind: EventKind) -> BridgeResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(decode_err(kind, format!("value {value} overflows u64")));
    }
    Ok(value.as_u64())
}

fn decode_data(log: &Log, params: &[ParamType], kind: EventKind) -> BridgeResult<Vec<Token>> {
    abi::decode(params, &log.data).map_err(|e| decode_err(kind, e.to_string()))
}

fn data_u64(token: Token, kind: EventKind) -> BridgeResult<u64> {
    let value = token
        .into_uint()
        .ok_or_else(|| decode_err(kind, "expected uint"))?;
    u256_to_u64(value, kind)
}

fn data_u256(token: Token, kind: EventKind) -> BridgeResult<U256> {
    token
        .into_uint()
        .ok_or_else(|| decode_err(kind, "expected uint"))
}

fn decode_event(kind: EventKind, log: &Log) -> BridgeResult<DecodedEvent> {
    match kind {
        EventKind::NewHeaderBlock => {
            let mut data = decode_data(
                log,
                &[
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::FixedBytes(32),
                ],
                kind,
            )?
            .into_iter();
            let start = data_u64(data.next().unwrap(), kind)?;
            let end = data_u64(data.next().unwrap(), kind)?;
            let root = data
                .next()
                .unwrap()
                .into_fixed_bytes()
                .ok_or_else(|| decode_err(kind, "expected bytes32 root"))?;
            Ok(DecodedEvent::NewHeaderBlock {
                proposer: topic_address(log, 1, kind)?,
                header_block_id: topic_u64(log, 2, kind)?,
                reward: topic_u256(log, 3, kind)?,
                start,
                end,
                root: H256::from_slice(&root),
            })
        }
        EventKind::Staked => {
            let mut data =
                decode_data(log, &[ParamType::Uint(256), ParamType::Uint(256)], kind)?.into_iter();
            Ok(DecodedEvent::Staked {
                signer: topic_address(log, 1, kind)?,
                validator_id: topic_u64(log, 2, kind)?,
                activation_epoch: topic_u64(log, 3, kind)?,
                amount: data_u256(data.next().unwrap(), kind)?,
                total: data_u256(data.next().unwrap(), kind)?,
            })
        }
        EventKind::UnstakeInit => {
            let mut data = decode_data(log, &[ParamType::Uint(256)], kind)?.into_iter();
            Ok(DecodedEvent::UnstakeInit {
                user: topic_address(log, 1, kind)?,
                validator_id: topic_u64(log, 2, kind)?,
                deactivation_epoch: topic_u64(log, 3, kind)?,
                amount: data_u256(data.next().unwrap(), kind)?,
            })
        }
        EventKind::StakeUpdate => {
            let mut data = decode_data(log, &[ParamType::Uint(256)], kind)?.into_iter();
            Ok(DecodedEvent::StakeUpdate {
                validator_id: topic_u64(log, 1, kind)?,
                new_amount: data_u256(data.next().unwrap(), kind)?,
            })
        }
        EventKind::SignerChange => Ok(DecodedEvent::SignerChange {
            validator_id: topic_u64(log, 1, kind)?,
            old_signer: topic_address(log, 2, kind)?,
            new_signer: topic_address(log, 3, kind)?,
        }),
        EventKind::ReStaked => {
            let mut data =
                decode_data(log, &[ParamType::Uint(256), ParamType::Uint(256)], kind)?.into_iter();
            Ok(DecodedEvent::ReStaked {
                validator_id: topic_u64(log, 1, kind)?,
                amount: data_u256(data.next().unwrap(), kind)?,
                total: data_u256(data.next().unwrap(), kind)?,
            })
        }
        EventKind::Jailed => Ok(DecodedEvent::Jailed {
            validator_id: topic_u64(log, 1, kind)?,
            exit_epoch: topic_u64(log, 2, kind)?,
        }),
        EventKind::StateSynced => {
            let mut data = decode_data(log, &[ParamType::Bytes], kind)?.into_iter();
            let payload = data
                .next()
                .unwrap()
                .into_bytes()
                .ok_or_else(|| decode_err(kind, "expected bytes payload"))?;
            Ok(DecodedEvent::StateSynced {
                id: topic_u64(log, 1, kind)?,
                contract_address: topic_address(log, 2, kind)?,
                data: payload,
            })
        }
        EventKind::TopUpFee => {
            let mut data = decode_data(log, &[ParamType::Uint(256)], kind)?.into_iter();
            Ok(DecodedEvent::TopUpFee {
                validator_id: topic_u64(log, 1, kind)?,
                fee: data_u256(data.next().unwrap(), kind)?,
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::LogBuilder;
    use super::*;

    #[test]
    fn test_selector_table_covers_all_kinds() {
        let registry = EventRegistry::new();
        let kinds = [
            EventKind::NewHeaderBlock,
            EventKind::Staked,
            EventKind::UnstakeInit,
            EventKind::StakeUpdate,
            EventKind::SignerChange,
            EventKind::ReStaked,
            EventKind::Jailed,
            EventKind::StateSynced,
            EventKind::TopUpFee,
        ];
        for kind in kinds {
            let (_, found) = registry
                .lookup(&kind.selector())
                .unwrap_or_else(|| panic!("selector for {} not registered", kind.name()));
            assert_eq!(found, kind);
        }
    }

    #[test]
    fn test_unknown_topic_drops() {
        let registry = EventRegistry::new();
        let bogus = H256::repeat_byte(0x42);
        assert!(registry.lookup(&bogus).is_none());
    }

    #[test]
    fn test_contract_lookup_order() {
        let registry = EventRegistry::new();
        let (contract, _) = registry
            .lookup(&EventKind::NewHeaderBlock.selector())
            .unwrap();
        assert_eq!(contract, BridgeContract::RootChain);
        let (contract, _) = registry.lookup(&EventKind::StateSynced.selector()).unwrap();
        assert_eq!(contract, BridgeContract::StateSender);
        let (contract, _) = registry.lookup(&EventKind::Staked.selector()).unwrap();
        assert_eq!(contract, BridgeContract::StakingInfo);
    }

    #[test]
    fn test_decode_new_header_block() {
        let registry = EventRegistry::new();
        let proposer = Address::repeat_byte(0x01);
        let root = H256::repeat_byte(0x77);
        let log = LogBuilder::new(EventKind::NewHeaderBlock)
            .topic_address(proposer)
            .topic_uint(10000)
            .topic_uint(12)
            .data_uint(0)
            .data_uint(255)
            .data_fixed_bytes(root)
            .build();

        let decoded = registry.decode(EventKind::NewHeaderBlock, &log).unwrap();
        assert_eq!(
            decoded,
            DecodedEvent::NewHeaderBlock {
                proposer,
                header_block_id: 10000,
                reward: U256::from(12),
                start: 0,
                end: 255,
                root,
            }
        );
    }

    #[test]
    fn test_decode_staked() {
        let registry = EventRegistry::new();
        let signer = Address::repeat_byte(0x03);
        let log = LogBuilder::new(EventKind::Staked)
            .topic_address(signer)
            .topic_uint(3)
            .topic_uint(9)
            .data_uint(1_000)
            .data_uint(5_000)
            .build();

        let decoded = registry.decode(EventKind::Staked, &log).unwrap();
        assert_eq!(
            decoded,
            DecodedEvent::Staked {
                signer,
                validator_id: 3,
                activation_epoch: 9,
                amount: U256::from(1_000),
                total: U256::from(5_000),
            }
        );
    }

    #[test]
    fn test_decode_state_synced() {
        let registry = EventRegistry::new();
        let receiver = Address::repeat_byte(0x0b);
        let log = LogBuilder::new(EventKind::StateSynced)
            .topic_uint(42)
            .topic_address(receiver)
            .data_bytes(vec![0xde, 0xad])
            .build();

        let decoded = registry.decode(EventKind::StateSynced, &log).unwrap();
        assert_eq!(
            decoded,
            DecodedEvent::StateSynced {
                id: 42,
                contract_address: receiver,
                data: vec![0xde, 0xad],
            }
        );
    }

    #[test]
    fn test_decode_signer_change_topics_only() {
        let registry = EventRegistry::new();
        let old = Address::repeat_byte(0x05);
        let new = Address::repeat_byte(0x06);
        let log = LogBuilder::new(EventKind::SignerChange)
            .topic_uint(3)
            .topic_address(old)
            .topic_address(new)
            .build();

        let decoded = registry.decode(EventKind::SignerChange, &log).unwrap();
        assert_eq!(
            decoded,
            DecodedEvent::SignerChange {
                validator_id: 3,
                old_signer: old,
                new_signer: new,
            }
        );
    }

    #[test]
    fn test_decode_missing_topic_is_decode_error() {
        let registry = EventRegistry::new();
        // Staked with no indexed topics at all
        let log = LogBuilder::new(EventKind::Staked)
            .data_uint(1)
            .data_uint(2)
            .build();
        let err = registry.decode(EventKind::Staked, &log).unwrap_err();
        assert_eq!(err.error_type(), "decode");
    }

    #[test]
    fn test_decode_truncated_data_is_decode_error() {
        let registry = EventRegistry::new();
        // StakeUpdate with empty data section
        let log = LogBuilder::new(EventKind::StakeUpdate).topic_uint(3).build();
        let err = registry.decode(EventKind::StakeUpdate, &log).unwrap_err();
        assert_eq!(err.error_type(), "decode");
    }
}
