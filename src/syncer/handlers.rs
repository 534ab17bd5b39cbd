// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Per-event translation of decoded logs into consensus-chain messages.
//!
//! Staking-mutation messages are validator-authored: they are produced only
//! when the event's subject is this validator. Ack/record/topup messages are
//! network-wide; any validator may submit them and the consensus chain
//! deduplicates on `(tx_hash, log_index)`.

use ethers::types::{Bytes, H256};
use tracing::debug;

use crate::abi::DecodedEvent;
use crate::msg::BridgeMsg;
use crate::types::ValidatorIdentity;

pub fn handle_event(
    identity: &ValidatorIdentity,
    event: &DecodedEvent,
    bor_chain_id: &str,
    tx_hash: H256,
    log_index: u64,
) -> Option<BridgeMsg> {
    match event {
        DecodedEvent::NewHeaderBlock {
            header_block_id, ..
        } => Some(BridgeMsg::CheckpointAck {
            from: identity.address,
            header_block_id: *header_block_id,
            tx_hash,
            log_index,
        }),
        DecodedEvent::Staked { validator_id, .. } => {
            if *validator_id != identity.id {
                return None;
            }
            Some(BridgeMsg::ValidatorJoin {
                from: identity.address,
                validator_id: *validator_id,
                signer_pub_key: Bytes::from(identity.pub_key.clone()),
                tx_hash,
                log_index,
            })
        }
        DecodedEvent::UnstakeInit { validator_id, .. } => {
            if *validator_id != identity.id {
                return None;
            }
            Some(BridgeMsg::ValidatorExit {
                from: identity.address,
                validator_id: *validator_id,
                tx_hash,
                log_index,
            })
        }
        DecodedEvent::StakeUpdate { validator_id, .. } => {
            if *validator_id != identity.id {
                return None;
            }
            Some(BridgeMsg::StakeUpdate {
                from: identity.address,
                validator_id: *validator_id,
                tx_hash,
                log_index,
            })
        }
        DecodedEvent::SignerChange {
            validator_id,
            new_signer,
            ..
        } => {
            if *new_signer != identity.address {
                return None;
            }
            Some(BridgeMsg::SignerUpdate {
                from: identity.address,
                validator_id: *validator_id,
                new_signer_pub_key: Bytes::from(identity.pub_key.clone()),
                tx_hash,
                log_index,
            })
        }
        // Recognized but produce no message
        DecodedEvent::ReStaked { validator_id, .. } => {
            debug!(validator_id, "observed ReStaked, no message produced");
            None
        }
        DecodedEvent::Jailed { validator_id, .. } => {
            debug!(validator_id, "observed Jailed, no message produced");
            None
        }
        DecodedEvent::StateSynced { id, .. } => Some(BridgeMsg::EventRecord {
            from: identity.address,
            id: *id,
            chain_id: bor_chain_id.to_string(),
            tx_hash,
            log_index,
        }),
        DecodedEvent::TopUpFee { validator_id, .. } => Some(BridgeMsg::Topup {
            from: identity.address,
            validator_id: *validator_id,
            tx_hash,
            log_index,
        }),
    }
}
