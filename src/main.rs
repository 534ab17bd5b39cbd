// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use matic_bridge::config::BridgeConfig;
use matic_bridge::metrics::run_metrics_server;
use matic_bridge::node::run_bridge_node;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "bridge", rename_all = "kebab-case")]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load(&args.config_path)?;

    let registry = prometheus::Registry::new();
    let metrics_addr = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        config.metrics_port,
    );
    tokio::spawn(run_metrics_server(metrics_addr, registry.clone()));

    let node = run_bridge_node(config, &registry).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = node.stopped() => {
            info!("a component stopped the node");
        }
    }
    node.shutdown().await;
    Ok(())
}
