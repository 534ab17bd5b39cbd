// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) headers_received: IntCounter,
    pub(crate) last_scanned_block: IntGauge,
    pub(crate) logs_scanned: IntCounter,
    pub(crate) events_decoded: IntCounterVec,
    pub(crate) events_unrecognized: IntCounter,

    pub(crate) broadcasts_ok: IntCounterVec,
    pub(crate) broadcasts_err: IntCounterVec,

    pub(crate) checkpoint_actions: IntCounterVec,
    pub(crate) span_proposals: IntCounter,
    pub(crate) rpc_errors: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            headers_received: register_int_counter_with_registry!(
                "bridge_headers_received",
                "Total number of main-chain headers received",
                registry,
            )
            .unwrap(),
            last_scanned_block: register_int_gauge_with_registry!(
                "bridge_last_scanned_block",
                "Highest main-chain block whose logs were dispatched",
                registry,
            )
            .unwrap(),
            logs_scanned: register_int_counter_with_registry!(
                "bridge_logs_scanned",
                "Total number of logs returned by range scans",
                registry,
            )
            .unwrap(),
            events_decoded: register_int_counter_vec_with_registry!(
                "bridge_events_decoded",
                "Decoded events by kind",
                &["event"],
                registry,
            )
            .unwrap(),
            events_unrecognized: register_int_counter_with_registry!(
                "bridge_events_unrecognized",
                "Logs whose topic matched no known event",
                registry,
            )
            .unwrap(),
            broadcasts_ok: register_int_counter_vec_with_registry!(
                "bridge_broadcasts_ok",
                "Messages accepted by the consensus chain, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            broadcasts_err: register_int_counter_vec_with_registry!(
                "bridge_broadcasts_err",
                "Failed broadcasts by kind and error type",
                &["kind", "error"],
                registry,
            )
            .unwrap(),
            checkpoint_actions: register_int_counter_vec_with_registry!(
                "bridge_checkpoint_actions",
                "Checkpoint decider outcomes",
                &["action"],
                registry,
            )
            .unwrap(),
            span_proposals: register_int_counter_with_registry!(
                "bridge_span_proposals",
                "Span proposals broadcast by this validator",
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "bridge_rpc_errors",
                "RPC/REST failures by error type",
                &["error"],
                registry,
            )
            .unwrap(),
        })
    }

    #[cfg(test)]
    pub fn new_for_test() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}

/// Serve the registry on `GET /metrics`.
pub async fn run_metrics_server(addr: SocketAddr, registry: Registry) -> anyhow::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let registry = registry.clone();
            async move {
                let mut buf = Vec::new();
                let encoder = TextEncoder::new();
                if let Err(e) = encoder.encode(&registry.gather(), &mut buf) {
                    return format!("# encode error: {e}");
                }
                String::from_utf8(buf).unwrap_or_default()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
