// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint decider.
//!
//! On every tick the decider gathers three states in parallel — the contract
//! head, the consensus chain's buffered proposal, and the last committed
//! checkpoint — and reconciles them into one of `ack`, `propose` or `idle`.
//! Any fetch failure aborts the whole decision; the next tick re-enters the
//! same path.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::H256;
use ethers::utils::keccak256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastQueue;
use crate::error::BridgeResult;
use crate::eth_client::{ChildChain, RootChain};
use crate::heimdall_client::ConsensusRest;
use crate::metrics::BridgeMetrics;
use crate::msg::BridgeMsg;
use crate::syncer::unix_now;
use crate::types::{ChildHeaderFields, ContractCheckpoint, HeimdallCheckpoint, ValidatorIdentity};

#[derive(Debug, Clone)]
pub struct CheckpointParams {
    /// Target checkpoint span in child blocks
    pub avg_checkpoint_length: u64,
    /// Hard cap for a single checkpoint
    pub max_checkpoint_length: u64,
    /// Divisor deriving the header-block id acked to the consensus chain
    pub child_block_interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAction {
    /// The contract has advanced past what the consensus chain knows
    Ack { header_block_id: u64 },
    Propose { start: u64, end: u64, forced: bool },
    Idle,
}

/// The decision table, evaluated top-down. All height arithmetic is
/// unsigned; an underflowing diff means "nothing new".
pub fn determine_action(
    head: &ContractCheckpoint,
    committed: &HeimdallCheckpoint,
    latest_child_block: u64,
    now: u64,
    params: &CheckpointParams,
) -> CheckpointAction {
    // 1. ACK due
    if committed.found && committed.end + 1 == head.start {
        return CheckpointAction::Ack {
            header_block_id: head
                .current_header_block
                .saturating_sub(params.child_block_interval),
        };
    }

    // 2. Propose new
    let mut start = head.end;
    if start > 0 {
        start += 1;
    }
    let diff = (latest_child_block + 1).saturating_sub(start);
    if diff == 0 {
        return CheckpointAction::Idle;
    }

    let mut expected = diff - diff % params.avg_checkpoint_length;
    if expected > 0 {
        expected -= 1;
    }
    if expected > params.max_checkpoint_length - 1 {
        expected = params.max_checkpoint_length - 1;
    }
    let end = start + expected;

    // 3. Force push when block producers stall
    if end == 0 || end == start || diff < params.avg_checkpoint_length {
        let force_push_interval = 2 * params.max_checkpoint_length; // seconds
        if now.saturating_sub(head.timestamp) > force_push_interval {
            if latest_child_block > start {
                return CheckpointAction::Propose {
                    start,
                    end: latest_child_block,
                    forced: true,
                };
            }
            return CheckpointAction::Idle;
        }
    }

    if end <= start {
        return CheckpointAction::Idle;
    }
    CheckpointAction::Propose {
        start,
        end,
        forced: false,
    }
}

/// Merkle leaf over the child header fields, one 32-byte word per field.
pub fn header_leaf(fields: &ChildHeaderFields) -> [u8; 32] {
    let mut buf = [0u8; 128];
    buf[24..32].copy_from_slice(&fields.number.to_be_bytes());
    buf[56..64].copy_from_slice(&fields.time.to_be_bytes());
    buf[64..96].copy_from_slice(fields.tx_root.as_bytes());
    buf[96..128].copy_from_slice(fields.receipts_root.as_bytes());
    keccak256(buf)
}

/// Keccak merkle root with zero-hash padding to the next power of two.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    let width = leaves.len().next_power_of_two();
    level.resize(width, [0u8; 32]);

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(&pair[1]);
                keccak256(buf)
            })
            .collect();
    }
    level[0]
}

pub struct Checkpointer {
    root_chain: Arc<dyn RootChain>,
    child_chain: Arc<dyn ChildChain>,
    rest: Arc<dyn ConsensusRest>,
    queue: Arc<BroadcastQueue>,
    identity: Arc<ValidatorIdentity>,
    params: CheckpointParams,
    poll_interval: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl Checkpointer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root_chain: Arc<dyn RootChain>,
        child_chain: Arc<dyn ChildChain>,
        rest: Arc<dyn ConsensusRest>,
        queue: Arc<BroadcastQueue>,
        identity: Arc<ValidatorIdentity>,
        params: CheckpointParams,
        poll_interval: Duration,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            root_chain,
            child_chain,
            rest,
            queue,
            identity,
            params,
            poll_interval,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("checkpointer started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("checkpointer cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.metrics
                            .rpc_errors
                            .with_label_values(&[e.error_type()])
                            .inc();
                        warn!(error = %e, "checkpoint tick skipped");
                    }
                }
            }
        }
    }

    pub(crate) async fn tick(&self) -> BridgeResult<()> {
        let latest_child_block = self.child_chain.latest_block_number().await?;

        debug!("collecting checkpoint status from different sources");
        let (head, buffered, committed) = tokio::join!(
            self.root_chain.checkpoint_head(),
            self.rest.buffered_checkpoint(),
            self.rest.committed_checkpoint(),
        );
        // A partial failure aborts the whole decision
        let head = head?;
        let buffered = buffered?;
        let committed = committed?;

        if buffered.found {
            debug!(
                start = buffered.start,
                end = buffered.end,
                "checkpoint sitting in consensus buffer"
            );
        }

        let action = determine_action(
            &head,
            &committed,
            latest_child_block,
            unix_now(),
            &self.params,
        );
        match action {
            CheckpointAction::Idle => {
                self.metrics
                    .checkpoint_actions
                    .with_label_values(&["idle"])
                    .inc();
                Ok(())
            }
            CheckpointAction::Ack { header_block_id } => {
                info!(
                    header_block_id,
                    contract_start = head.start,
                    committed_end = committed.end,
                    "detected mainchain checkpoint, sending ack"
                );
                self.metrics
                    .checkpoint_actions
                    .with_label_values(&["ack"])
                    .inc();
                self.queue
                    .enqueue(BridgeMsg::CheckpointAck {
                        from: self.identity.address,
                        header_block_id,
                        tx_hash: H256::zero(),
                        log_index: 0,
                    })
                    .await?;
                Ok(())
            }
            CheckpointAction::Propose { start, end, forced } => {
                if forced {
                    info!(start, end, "force pushing checkpoint");
                }
                let root = self.child_root(start, end).await?;
                info!(start, end, ?root, "new checkpoint header created");
                self.metrics
                    .checkpoint_actions
                    .with_label_values(&[if forced { "force_push" } else { "propose" }])
                    .inc();
                self.queue
                    .enqueue(BridgeMsg::Checkpoint {
                        proposer: self.identity.address,
                        start_block: start,
                        end_block: end,
                        root_hash: root,
                    })
                    .await?;
                Ok(())
            }
        }
    }

    /// Merkle root over child-chain headers `[start, end]`.
    async fn child_root(&self, start: u64, end: u64) -> BridgeResult<H256> {
        let mut leaves = Vec::with_capacity((end - start + 1) as usize);
        for number in start..=end {
            let fields = self.child_chain.header_fields(number).await?;
            leaves.push(header_leaf(&fields));
        }
        Ok(H256::from(merkle_root(&leaves)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::heimdall_client::ConsensusRpc;
    use crate::msg::SignedMsg;
    use crate::types::{CommitData, Span, TxCommit, TxProof, ValidatorInfo};
    use async_trait::async_trait;
    use ethers::signers::LocalWallet;
    use ethers::types::Address;
    use std::sync::Mutex;

    fn params() -> CheckpointParams {
        CheckpointParams {
            avg_checkpoint_length: 100,
            max_checkpoint_length: 200,
            child_block_interval: 10_000,
        }
    }

    fn head(start: u64, end: u64, timestamp: u64) -> ContractCheckpoint {
        ContractCheckpoint {
            start,
            end,
            current_header_block: 40_000,
            timestamp,
            root: H256::zero(),
        }
    }

    #[test]
    fn test_propose_expected_diff() {
        // On-chain end=99, 260 child blocks: propose [100, 199]
        let now = 1_000_000;
        let action = determine_action(
            &head(0, 99, now - 5),
            &HeimdallCheckpoint::new(0, 99),
            260,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Propose {
                start: 100,
                end: 199,
                forced: false,
            }
        );
    }

    #[test]
    fn test_force_push_when_producers_stall() {
        // diff = 21 < avg and the head is 1000 seconds old (> 2 * max = 400)
        let now = 1_000_000;
        let action = determine_action(
            &head(0, 99, now - 1000),
            &HeimdallCheckpoint::new(0, 99),
            120,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Propose {
                start: 100,
                end: 120,
                forced: true,
            }
        );
    }

    #[test]
    fn test_force_push_boundary_is_strict() {
        let now = 1_000_000;
        // Exactly 2 * max seconds old: not yet forced, and the normal path
        // has nothing proposable
        let action = determine_action(
            &head(0, 99, now - 400),
            &HeimdallCheckpoint::new(0, 99),
            120,
            now,
            &params(),
        );
        assert_eq!(action, CheckpointAction::Idle);

        // One second past the boundary fires
        let action = determine_action(
            &head(0, 99, now - 401),
            &HeimdallCheckpoint::new(0, 99),
            120,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Propose {
                start: 100,
                end: 120,
                forced: true,
            }
        );
    }

    #[test]
    fn test_no_force_push_when_enough_blocks() {
        // diff >= avg means the normal proposal stands even for an old head
        let now = 1_000_000;
        let action = determine_action(
            &head(0, 99, now - 10_000),
            &HeimdallCheckpoint::new(0, 99),
            260,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Propose {
                start: 100,
                end: 199,
                forced: false,
            }
        );
    }

    #[test]
    fn test_ack_when_contract_is_ahead() {
        // committed.end + 1 == on-chain start: the contract advanced past
        // what the consensus chain knows
        let now = 1_000_000;
        let mut contract = head(100, 199, now - 5);
        contract.current_header_block = 40_000;
        let action = determine_action(
            &contract,
            &HeimdallCheckpoint::new(0, 99),
            260,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Ack {
                header_block_id: 30_000,
            }
        );
    }

    #[test]
    fn test_no_ack_without_committed_checkpoint() {
        // A fresh consensus chain has no committed checkpoint; genesis
        // proposal proceeds instead
        let now = 1_000_000;
        let action = determine_action(
            &head(0, 0, now - 5),
            &HeimdallCheckpoint::not_found(),
            260,
            now,
            &params(),
        );
        assert_eq!(
            action,
            CheckpointAction::Propose {
                start: 0,
                end: 199,
                forced: false,
            }
        );
    }

    #[test]
    fn test_idle_when_nothing_new() {
        let now = 1_000_000;
        // Child chain is behind the on-chain end: diff underflows to zero
        let action = determine_action(
            &head(0, 99, now - 5),
            &HeimdallCheckpoint::new(0, 99),
            80,
            now,
            &params(),
        );
        assert_eq!(action, CheckpointAction::Idle);
    }

    #[test]
    fn test_idle_when_under_avg_and_fresh() {
        let now = 1_000_000;
        // 21 new blocks, under avg, head is fresh: wait for more blocks
        let action = determine_action(
            &head(0, 99, now - 5),
            &HeimdallCheckpoint::new(0, 99),
            120,
            now,
            &params(),
        );
        assert_eq!(action, CheckpointAction::Idle);
    }

    #[test]
    fn test_propose_capped_at_max_length() {
        let now = 1_000_000;
        let action = determine_action(
            &head(0, 99, now - 5),
            &HeimdallCheckpoint::new(0, 99),
            5_000,
            now,
            &params(),
        );
        match action {
            CheckpointAction::Propose { start, end, forced } => {
                assert_eq!(start, 100);
                assert!(!forced);
                assert_eq!(end - start + 1, params().max_checkpoint_length);
            }
            other => panic!("expected propose, got {other:?}"),
        }
    }

    #[test]
    fn test_propose_length_is_multiple_of_avg() {
        let now = 1_000_000;
        for latest in [150u64, 260, 399, 5_000] {
            let action = determine_action(
                &head(0, 99, now - 5),
                &HeimdallCheckpoint::new(0, 99),
                latest,
                now,
                &params(),
            );
            if let CheckpointAction::Propose { start, end, forced } = action {
                assert!(!forced);
                let len = end - start + 1;
                assert!(len <= params().max_checkpoint_length);
                assert!(
                    len % params().avg_checkpoint_length == 0,
                    "len {len} not a multiple of avg for latest={latest}"
                );
            }
        }
    }

    #[test]
    fn test_merkle_root_shapes() {
        let l0 = [0x01u8; 32];
        let l1 = [0x02u8; 32];
        let l2 = [0x03u8; 32];

        // Single leaf is its own root
        assert_eq!(merkle_root(&[l0]), l0);

        // Two leaves hash pairwise
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&l0);
        buf[32..].copy_from_slice(&l1);
        assert_eq!(merkle_root(&[l0, l1]), keccak256(buf));

        // Three leaves pad to four with the zero hash
        let root3 = merkle_root(&[l0, l1, l2]);
        let root4 = merkle_root(&[l0, l1, l2, [0u8; 32]]);
        assert_eq!(root3, root4);

        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_header_leaf_is_field_sensitive() {
        let base = ChildHeaderFields {
            number: 100,
            time: 1_700_000_000,
            tx_root: H256::repeat_byte(0x11),
            receipts_root: H256::repeat_byte(0x22),
        };
        let mut other = base;
        other.number = 101;
        assert_ne!(header_leaf(&base), header_leaf(&other));
        assert_eq!(header_leaf(&base), header_leaf(&base));
    }

    // Tick-level wiring: all three fetches must succeed or nothing happens.

    struct FakeRoot {
        head: ContractCheckpoint,
    }

    #[async_trait]
    impl RootChain for FakeRoot {
        async fn checkpoint_head(&self) -> BridgeResult<ContractCheckpoint> {
            Ok(self.head.clone())
        }

        async fn commit_span(
            &self,
            _vote_bytes: Vec<u8>,
            _sigs: Vec<u8>,
            _tx_bytes: Vec<u8>,
            _proof: Vec<u8>,
        ) -> BridgeResult<H256> {
            unimplemented!()
        }
    }

    struct FakeChild {
        latest: u64,
    }

    #[async_trait]
    impl ChildChain for FakeChild {
        async fn latest_block_number(&self) -> BridgeResult<u64> {
            Ok(self.latest)
        }

        async fn header_fields(&self, number: u64) -> BridgeResult<ChildHeaderFields> {
            Ok(ChildHeaderFields {
                number,
                time: number * 2,
                tx_root: H256::repeat_byte(0x11),
                receipts_root: H256::repeat_byte(0x22),
            })
        }
    }

    struct FakeRest {
        committed: HeimdallCheckpoint,
        fail_buffer: bool,
    }

    #[async_trait]
    impl ConsensusRest for FakeRest {
        async fn buffered_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint> {
            if self.fail_buffer {
                return Err(BridgeError::TransientRpc("buffer query down".to_string()));
            }
            Ok(HeimdallCheckpoint::not_found())
        }

        async fn committed_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint> {
            Ok(self.committed)
        }

        async fn latest_span(&self) -> BridgeResult<Span> {
            unimplemented!()
        }

        async fn span_proposer(&self) -> BridgeResult<ValidatorInfo> {
            unimplemented!()
        }

        async fn next_span_info(
            &self,
            _start_block: u64,
            _chain_id: &str,
            _proposer: Address,
        ) -> BridgeResult<crate::types::NextSpanInfo> {
            unimplemented!()
        }
    }

    struct RecordingRpc {
        msgs: Mutex<Vec<BridgeMsg>>,
    }

    #[async_trait]
    impl ConsensusRpc for RecordingRpc {
        async fn broadcast_tx_sync(&self, tx_bytes: Vec<u8>) -> BridgeResult<H256> {
            let signed: SignedMsg = serde_json::from_slice(&tx_bytes).unwrap();
            self.msgs.lock().unwrap().push(signed.msg);
            Ok(H256::repeat_byte(0x01))
        }

        async fn wait_for_commit(&self, hash: H256) -> BridgeResult<TxCommit> {
            Ok(TxCommit { height: 1, hash })
        }

        async fn tx_with_proof(&self, _hash: H256) -> BridgeResult<TxProof> {
            unimplemented!()
        }

        async fn commit_data(&self, _height: u64) -> BridgeResult<CommitData> {
            unimplemented!()
        }
    }

    fn checkpointer(
        contract: ContractCheckpoint,
        committed: HeimdallCheckpoint,
        latest_child: u64,
        fail_buffer: bool,
    ) -> (Checkpointer, Arc<RecordingRpc>) {
        let wallet: LocalWallet =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let identity = Arc::new(ValidatorIdentity::from_wallet(&wallet, 3));
        let rpc = Arc::new(RecordingRpc {
            msgs: Mutex::new(Vec::new()),
        });
        let metrics = BridgeMetrics::new_for_test();
        let queue = Arc::new(BroadcastQueue::new(wallet, rpc.clone(), metrics.clone()));
        let checkpointer = Checkpointer::new(
            Arc::new(FakeRoot { head: contract }),
            Arc::new(FakeChild {
                latest: latest_child,
            }),
            Arc::new(FakeRest {
                committed,
                fail_buffer,
            }),
            queue,
            identity,
            params(),
            Duration::from_secs(1),
            metrics,
        );
        (checkpointer, rpc)
    }

    #[tokio::test]
    async fn test_tick_broadcasts_proposal_with_root() {
        let now = unix_now();
        let (checkpointer, rpc) = checkpointer(
            head(0, 99, now),
            HeimdallCheckpoint::new(0, 99),
            260,
            false,
        );
        checkpointer.tick().await.unwrap();

        let msgs = rpc.msgs.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            BridgeMsg::Checkpoint {
                start_block,
                end_block,
                root_hash,
                ..
            } => {
                assert_eq!((*start_block, *end_block), (100, 199));
                // Root must equal the merkle root over headers [100, 199]
                let leaves: Vec<[u8; 32]> = (100..=199)
                    .map(|number| {
                        header_leaf(&ChildHeaderFields {
                            number,
                            time: number * 2,
                            tx_root: H256::repeat_byte(0x11),
                            receipts_root: H256::repeat_byte(0x22),
                        })
                    })
                    .collect();
                assert_eq!(*root_hash, H256::from(merkle_root(&leaves)));
            }
            other => panic!("expected Checkpoint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tick_aborts_on_partial_fetch_failure() {
        let now = unix_now();
        let (checkpointer, rpc) = checkpointer(
            head(0, 99, now),
            HeimdallCheckpoint::new(0, 99),
            260,
            true,
        );
        assert!(checkpointer.tick().await.is_err());
        assert!(rpc.msgs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_ack_carries_zero_origin() {
        let now = unix_now();
        let (checkpointer, rpc) = checkpointer(
            head(100, 199, now),
            HeimdallCheckpoint::new(0, 99),
            260,
            false,
        );
        checkpointer.tick().await.unwrap();

        let msgs = rpc.msgs.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            BridgeMsg::CheckpointAck {
                header_block_id,
                tx_hash,
                log_index,
                ..
            } => {
                assert_eq!(*header_block_id, 30_000);
                assert_eq!(*tx_hash, H256::zero());
                assert_eq!(*log_index, 0);
            }
            other => panic!("expected CheckpointAck, got {other:?}"),
        }
    }
}
