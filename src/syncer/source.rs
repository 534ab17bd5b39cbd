// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Header source: push subscription with a one-way polling fallback.
//!
//! The subscription is attempted exactly once at start. If it cannot be
//! established, the source switches to polling for the rest of the run and
//! never tries to subscribe again. If an established subscription later
//! breaks, the error is forwarded so the whole syncer stops.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BridgeResult;
use crate::eth_client::MainChain;
use crate::types::LightHeader;

pub async fn run_header_source(
    main_chain: Arc<dyn MainChain>,
    sink: mpsc::Sender<BridgeResult<LightHeader>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    match main_chain.subscribe_new_heads().await {
        Ok(stream) => {
            info!("subscribed to new heads");
            run_subscription(stream, sink, cancel).await;
        }
        Err(e) => {
            info!(error = %e, "subscription unavailable, polling for new heads");
            run_polling(main_chain, sink, poll_interval, cancel).await;
        }
    }
}

async fn run_subscription(
    mut stream: futures::stream::BoxStream<'static, BridgeResult<LightHeader>>,
    sink: mpsc::Sender<BridgeResult<LightHeader>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("header subscription cancelled");
                return;
            }
            item = stream.next() => {
                match item {
                    Some(item) => {
                        if sink.send(item).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        // Stream ended without an explicit error; treat it the
                        // same way, the reader stops the component.
                        let _ = sink
                            .send(Err(crate::error::BridgeError::TransientRpc(
                                "header subscription closed".to_string(),
                            )))
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

async fn run_polling(
    main_chain: Arc<dyn MainChain>,
    sink: mpsc::Sender<BridgeResult<LightHeader>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("header polling cancelled");
                return;
            }
            _ = ticker.tick() => {
                match main_chain.latest_header().await {
                    Ok(header) => {
                        if sink.send(Ok(header)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        // Polling failures are transient; skip the tick
                        warn!(error = %e, "failed to poll latest header");
                    }
                }
            }
        }
    }
}
