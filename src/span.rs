// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Span decider.
//!
//! Every tick, if this validator is the designated next-span proposer, a
//! `ProposeSpan` is built from the consensus chain's next-span parameters
//! and broadcast. After commit, the tx is relayed back to the root-chain
//! contract together with its votes, signatures and merkle proof.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastQueue;
use crate::error::{BridgeError, BridgeResult};
use crate::eth_client::{ChildChain, RootChain};
use crate::heimdall_client::{ConsensusRest, ConsensusRpc};
use crate::metrics::BridgeMetrics;
use crate::msg::BridgeMsg;
use crate::storage::BridgeStore;
use crate::types::{TxCommit, ValidatorIdentity};

/// The on-chain verifier expects the flat hex rendering of the sibling
/// hashes, in proof order.
pub fn flatten_proof(siblings: &[[u8; 32]]) -> Vec<u8> {
    let joined: String = siblings.iter().map(hex::encode).collect();
    joined.into_bytes()
}

pub struct SpanService {
    rest: Arc<dyn ConsensusRest>,
    rpc: Arc<dyn ConsensusRpc>,
    root_chain: Arc<dyn RootChain>,
    child_chain: Arc<dyn ChildChain>,
    queue: Arc<BroadcastQueue>,
    store: BridgeStore,
    identity: Arc<ValidatorIdentity>,
    bor_chain_id: String,
    poll_interval: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl SpanService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rest: Arc<dyn ConsensusRest>,
        rpc: Arc<dyn ConsensusRpc>,
        root_chain: Arc<dyn RootChain>,
        child_chain: Arc<dyn ChildChain>,
        queue: Arc<BroadcastQueue>,
        store: BridgeStore,
        identity: Arc<ValidatorIdentity>,
        bor_chain_id: String,
        poll_interval: Duration,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            rest,
            rpc,
            root_chain,
            child_chain,
            queue,
            store,
            identity,
            bor_chain_id,
            poll_interval,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("span service started");
        if let Ok(Some(last)) = self.store.last_span() {
            debug!(last_span = last, "last proposed span on record");
        }
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("span service cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if !self.is_span_proposer().await {
                        continue;
                    }
                    if let Err(e) = self.propose().await {
                        self.metrics
                            .rpc_errors
                            .with_label_values(&[e.error_type()])
                            .inc();
                        warn!(error = %e, "span proposal attempt failed");
                    }
                }
            }
        }
    }

    /// Whether this validator is the designated proposer for the next span.
    /// Query failures read as "not the proposer"; the next tick retries.
    pub(crate) async fn is_span_proposer(&self) -> bool {
        match self.rest.span_proposer().await {
            Ok(proposer) => {
                debug!(signer = ?proposer.signer, "fetched proposer for span");
                proposer.signer == self.identity.address
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch span proposer");
                false
            }
        }
    }

    pub(crate) async fn propose(&self) -> BridgeResult<()> {
        debug!("trying to propose committee for next span");
        let last_span = self.rest.latest_span().await?;
        debug!(
            id = last_span.id,
            start = last_span.start_block,
            end = last_span.end_block,
            "fetched last span"
        );

        let current_child_block = self.child_chain.latest_block_number().await?;
        debug!(current_child_block, "fetched current child block");
        if current_child_block <= last_span.start_block {
            return Ok(());
        }

        // Spans are contiguous: the next one starts right after the last
        let next_start = last_span.end_block + 1;
        let info = self
            .rest
            .next_span_info(next_start, &self.bor_chain_id, self.identity.address)
            .await?;
        info!(
            start = info.start_block,
            end = info.end_block,
            chain_id = %info.chain_id,
            "fetched information for next span"
        );

        let span_id = last_span.id + 1;
        let hash = self
            .queue
            .enqueue(BridgeMsg::ProposeSpan {
                span_id,
                proposer: self.identity.address,
                start_block: info.start_block,
                end_block: info.end_block,
                chain_id: info.chain_id,
            })
            .await?;
        self.metrics.span_proposals.inc();
        if let Err(e) = self.store.set_last_span(span_id) {
            warn!(error = %e, span_id, "failed to persist span cursor");
        }

        // A commit timeout surfaces here; the broadcast is not retried
        let commit = self.queue.wait_for_commit(hash).await?;
        info!(height = commit.height, ?hash, "span proposal committed");
        self.relay_commit(commit).await
    }

    /// Relay the consensus commitment back to the main chain.
    async fn relay_commit(&self, commit: TxCommit) -> BridgeResult<()> {
        let tx_proof = self.rpc.tx_with_proof(commit.hash).await?;
        let commit_data = self.rpc.commit_data(commit.height).await?;

        if tx_proof.tx.len() < 4 {
            return Err(BridgeError::Decode {
                event: "ProposeSpan".to_string(),
                msg: format!("committed tx is {} bytes, expected length prefix", tx_proof.tx.len()),
            });
        }
        // The wire framing prepends a 4-byte length prefix the on-chain
        // verifier rejects; pass the raw body.
        let tx_body = tx_proof.tx[4..].to_vec();
        let proof_bytes = flatten_proof(&tx_proof.siblings);

        self.root_chain
            .commit_span(commit_data.vote_bytes, commit_data.sigs, tx_body, proof_bytes)
            .await?;
        Ok(())
    }
}
