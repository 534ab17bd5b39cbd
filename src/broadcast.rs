// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! At-least-once submission of validator messages to the consensus chain.
//!
//! `enqueue` signs and submits in "sync" mode and returns the tx hash. A
//! failed submit is logged and dropped: the source cursor is never rewound,
//! so re-observation after a restart re-produces the same logical message
//! and the consensus chain deduplicates on `(tx_hash, log_index)`.

use std::sync::Arc;

use ethers::signers::LocalWallet;
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::BridgeResult;
use crate::heimdall_client::ConsensusRpc;
use crate::metrics::BridgeMetrics;
use crate::msg::{BridgeMsg, SignedMsg};
use crate::types::TxCommit;

pub struct BroadcastQueue {
    wallet: LocalWallet,
    rpc: Arc<dyn ConsensusRpc>,
    // The signing context is used from one task at a time per broadcast
    sign_lock: Mutex<()>,
    metrics: Arc<BridgeMetrics>,
}

impl BroadcastQueue {
    pub fn new(wallet: LocalWallet, rpc: Arc<dyn ConsensusRpc>, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            wallet,
            rpc,
            sign_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Sign and submit one message; returns the consensus-chain tx hash.
    /// Callers that need ordering between two messages must call this
    /// sequentially from the same task.
    pub async fn enqueue(&self, msg: BridgeMsg) -> BridgeResult<H256> {
        let kind = msg.kind();
        let result = self.sign_and_submit(msg).await;
        match &result {
            Ok(hash) => {
                info!(kind, ?hash, "message broadcast to heimdall");
                self.metrics.broadcasts_ok.with_label_values(&[kind]).inc();
            }
            Err(e) => {
                self.metrics
                    .broadcasts_err
                    .with_label_values(&[kind, e.error_type()])
                    .inc();
            }
        }
        result
    }

    /// `enqueue` for fire-and-forget callers: failures are logged and the
    /// message is dropped.
    pub async fn enqueue_or_drop(&self, msg: BridgeMsg) {
        let kind = msg.kind();
        if let Err(e) = self.enqueue(msg).await {
            error!(kind, error = %e, "dropping message after failed broadcast");
        }
    }

    /// Await the commit of a previously broadcast tx. Bounded by the RPC
    /// client's commit timeout; a timeout surfaces to the caller and the
    /// broadcast is not retried here.
    pub async fn wait_for_commit(&self, hash: H256) -> BridgeResult<TxCommit> {
        self.rpc.wait_for_commit(hash).await
    }

    async fn sign_and_submit(&self, msg: BridgeMsg) -> BridgeResult<H256> {
        let _guard = self.sign_lock.lock().await;
        let signed = sign_msg(&self.wallet, msg)?;
        let tx_bytes = signed.to_tx_bytes()?;
        self.rpc.broadcast_tx_sync(tx_bytes).await
    }
}

/// Recoverable secp256k1 signature over the keccak digest of the canonical
/// message body.
pub fn sign_msg(wallet: &LocalWallet, msg: BridgeMsg) -> BridgeResult<SignedMsg> {
    use ethers::signers::Signer;
    let digest = H256::from(keccak256(msg.sign_bytes()?));
    let signature = wallet
        .sign_hash(digest)
        .map_err(|e| crate::error::BridgeError::Generic(format!("signing failed: {e}")))?;
    Ok(SignedMsg {
        msg,
        signature: Bytes::from(signature.to_vec()),
        signer: wallet.address(),
    })
}
