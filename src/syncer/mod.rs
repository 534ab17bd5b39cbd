// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Confirmed-header pipeline.
//!
//! Headers arrive from the source (subscription or polling), age in the
//! confirmation buffer, and each drained range is scanned for logs from the
//! watched contracts. Decoded events become consensus-chain messages on the
//! broadcast queue. The cursor is persisted only after a scan's logs were
//! dispatched, so a crash replays the range and downstream dedup absorbs it.

pub mod buffer;
pub mod handlers;
pub mod source;

use std::sync::Arc;

use ethers::types::{Address, H256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::abi::EventRegistry;
use crate::broadcast::BroadcastQueue;
use crate::error::BridgeResult;
use crate::eth_client::MainChain;
use crate::metrics::BridgeMetrics;
use crate::storage::BridgeStore;
use crate::syncer::buffer::HeaderBuffer;
use crate::types::{LightHeader, ScanRange, ValidatorIdentity};

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone)]
pub struct SyncerParams {
    /// Seconds a header must age in the buffer before its range is scanned
    pub tx_confirmation_time: u64,
    /// Watched contracts: root chain, staking info, state sender
    pub addresses: Vec<Address>,
    /// Child chain id embedded in state-sync messages
    pub bor_chain_id: String,
}

pub struct Syncer {
    main_chain: Arc<dyn MainChain>,
    queue: Arc<BroadcastQueue>,
    store: BridgeStore,
    registry: EventRegistry,
    identity: Arc<ValidatorIdentity>,
    buffer: HeaderBuffer,
    params: SyncerParams,
    metrics: Arc<BridgeMetrics>,
}

impl Syncer {
    pub fn new(
        main_chain: Arc<dyn MainChain>,
        queue: Arc<BroadcastQueue>,
        store: BridgeStore,
        identity: Arc<ValidatorIdentity>,
        params: SyncerParams,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let buffer = HeaderBuffer::new(params.tx_confirmation_time);
        Self {
            main_chain,
            queue,
            store,
            registry: EventRegistry::new(),
            identity,
            buffer,
            params,
            metrics,
        }
    }

    /// Single-reader processing loop. Headers are handled strictly in arrival
    /// order; a subscription error after success stops the component.
    pub async fn run(
        mut self,
        mut headers: mpsc::Receiver<BridgeResult<LightHeader>>,
        cancel: CancellationToken,
    ) {
        info!("syncer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("syncer cancelled");
                    return;
                }
                item = headers.recv() => {
                    match item {
                        Some(Ok(header)) => self.process_header(header).await,
                        Some(Err(e)) => {
                            error!(error = %e, "header source failed, stopping syncer");
                            cancel.cancel();
                            return;
                        }
                        None => {
                            info!("header channel closed, stopping syncer");
                            return;
                        }
                    }
                }
            }
        }
    }

    pub async fn process_header(&mut self, header: LightHeader) {
        self.process_header_at(header, unix_now()).await;
    }

    pub(crate) async fn process_header_at(&mut self, header: LightHeader, now: u64) {
        debug!(number = header.number, "new block detected");
        self.metrics.headers_received.inc();
        self.buffer.push(header);

        let Some(range) = self.buffer.drain(now) else {
            return;
        };
        if let Err(e) = self.scan_range(range).await {
            // Transient failure: the cursor was not advanced and the next
            // confirmed range covers these blocks again.
            self.metrics
                .rpc_errors
                .with_label_values(&[e.error_type()])
                .inc();
            warn!(error = %e, from = range.from, to = range.to, "range scan failed, will retry");
        }
    }

    async fn scan_range(&self, range: ScanRange) -> BridgeResult<()> {
        // A storage failure here reads as an absent cursor for this tick
        let cursor = match self.store.last_block() {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "failed to read last-block cursor, treating as absent");
                None
            }
        };
        // With a cursor on record the scan always resumes at cursor + 1, even
        // when that lies below the drained range: a range whose query failed
        // is re-covered by the next confirmed range this way. Replayed blocks
        // are safe, dedup is downstream.
        let from = match cursor {
            Some(last) => last + 1,
            None => range.from,
        };
        let to = range.to;
        if from > to {
            debug!(from, to, "range already covered");
            return Ok(());
        }

        info!(from, to, "querying event logs");
        let logs = self
            .main_chain
            .filter_logs(from, to, &self.params.addresses)
            .await?;
        if !logs.is_empty() {
            debug!(count = logs.len(), "new logs found");
        }

        for log in &logs {
            self.metrics.logs_scanned.inc();
            self.dispatch_log(log).await;
        }

        if let Err(e) = self.store.set_last_block(to) {
            warn!(error = %e, to, "failed to persist last-block cursor");
        }
        self.metrics.last_scanned_block.set(to as i64);
        Ok(())
    }

    async fn dispatch_log(&self, log: &ethers::types::Log) {
        let Some(topic0) = log.topics.first() else {
            return;
        };
        let Some((_, kind)) = self.registry.lookup(topic0) else {
            self.metrics.events_unrecognized.inc();
            return;
        };

        let event = match self.registry.decode(kind, log) {
            Ok(event) => event,
            Err(e) => {
                // A bad item never aborts the batch
                warn!(event = kind.name(), error = %e, "failed to decode event, skipping");
                return;
            }
        };
        self.metrics
            .events_decoded
            .with_label_values(&[kind.name()])
            .inc();

        let tx_hash = log.transaction_hash.unwrap_or(H256::zero());
        let log_index = log.log_index.unwrap_or_default().low_u64();
        info!(event = kind.name(), ?tx_hash, log_index, "new event found");

        let Some(msg) = handlers::handle_event(
            &self.identity,
            &event,
            &self.params.bor_chain_id,
            tx_hash,
            log_index,
        ) else {
            return;
        };
        self.queue.enqueue_or_drop(msg).await;
    }
}
