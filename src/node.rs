// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Node assembly: builds the shared resources and starts the components in
//! dependency order. Stopping the node cancels every component's scope; the
//! queue and clients are dropped once all tasks have drained.

use std::sync::Arc;

use prometheus::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcast::BroadcastQueue;
use crate::checkpoint::{CheckpointParams, Checkpointer};
use crate::config::BridgeConfig;
use crate::eth_client::{ChildChain, EthClient, MainChain, RootChain, RootChainContract};
use crate::heimdall_client::{HeimdallRestClient, HeimdallRpcClient};
use crate::metrics::BridgeMetrics;
use crate::span::SpanService;
use crate::storage::BridgeStore;
use crate::syncer::source::run_header_source;
use crate::syncer::{Syncer, SyncerParams};

pub struct BridgeNode {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl BridgeNode {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every component scope and wait for the tasks to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("bridge node stopped");
    }

    /// Wait until some component stops the node (e.g. a failed header
    /// subscription) without initiating shutdown.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }
}

pub async fn run_bridge_node(
    config: BridgeConfig,
    registry: &Registry,
) -> anyhow::Result<BridgeNode> {
    let validated = config.validate()?;
    let metrics = BridgeMetrics::new(registry);
    let store = BridgeStore::open(&config.bridge_db_path)?;

    let main_chain = Arc::new(EthClient::new(&config.eth_rpc_url, "eth")?);
    main_chain.describe().await?;
    let child_chain = Arc::new(EthClient::new(&config.bor_rpc_url, "bor")?);
    child_chain.describe().await?;

    let root_chain: Arc<dyn RootChain> = Arc::new(
        RootChainContract::new(
            main_chain.provider(),
            validated.root_chain_address,
            validated.wallet.clone(),
        )
        .await?,
    );
    let rest = Arc::new(HeimdallRestClient::new(&config.heimdall_rest_url)?);
    let rpc = Arc::new(HeimdallRpcClient::new(&config.heimdall_rpc_url)?);

    let identity = Arc::new(validated.identity);
    let queue = Arc::new(BroadcastQueue::new(
        validated.wallet,
        rpc.clone(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // Header source feeds the syncer's single-reader channel
    let (header_tx, header_rx) = mpsc::channel(256);
    handles.push(tokio::spawn(run_header_source(
        main_chain.clone() as Arc<dyn MainChain>,
        header_tx,
        config.syncer_poll_interval,
        cancel.clone(),
    )));

    let syncer = Syncer::new(
        main_chain.clone(),
        queue.clone(),
        store.clone(),
        identity.clone(),
        SyncerParams {
            tx_confirmation_time: config.tx_confirmation_time,
            addresses: vec![
                validated.root_chain_address,
                validated.staking_info_address,
                validated.state_sender_address,
            ],
            bor_chain_id: config.bor_chain_id.clone(),
        },
        metrics.clone(),
    );
    handles.push(tokio::spawn(syncer.run(header_rx, cancel.clone())));

    let checkpointer = Checkpointer::new(
        root_chain.clone(),
        child_chain.clone() as Arc<dyn ChildChain>,
        rest.clone(),
        queue.clone(),
        identity.clone(),
        CheckpointParams {
            avg_checkpoint_length: config.avg_checkpoint_length,
            max_checkpoint_length: config.max_checkpoint_length,
            child_block_interval: config.child_block_interval,
        },
        config.checkpointer_poll_interval,
        metrics.clone(),
    );
    handles.push(tokio::spawn(checkpointer.run(cancel.clone())));

    let span_service = SpanService::new(
        rest,
        rpc,
        root_chain,
        child_chain as Arc<dyn ChildChain>,
        queue,
        store,
        identity,
        config.bor_chain_id.clone(),
        config.span_poll_interval,
        metrics,
    );
    handles.push(tokio::spawn(span_service.run(cancel.clone())));

    info!("bridge node started");
    Ok(BridgeNode { handles, cancel })
}
