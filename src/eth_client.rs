// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Main-chain and child-chain RPC clients.
//!
//! The traits here are the seams the pipeline components depend on; the
//! concrete implementations wrap an ethers `Provider<Http>`. Contract reads
//! and the `commitSpan` write use hand-built function descriptors instead of
//! generated bindings — the daemon only touches a handful of methods.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Filter, Log, TransactionRequest, H256};
use futures::stream::BoxStream;
use futures::StreamExt;
use once_cell::sync::Lazy;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{ChildHeaderFields, ContractCheckpoint, LightHeader};

/// Source of main-chain headers and logs.
#[async_trait]
pub trait MainChain: Send + Sync {
    /// Try to establish a push subscription for new heads. An `Err` here
    /// means the transport does not support it and the caller must fall back
    /// to polling. After a successful start, the stream yields one `Err`
    /// item and ends if the subscription breaks.
    async fn subscribe_new_heads(&self) -> BridgeResult<BoxStream<'static, BridgeResult<LightHeader>>>;

    async fn latest_header(&self) -> BridgeResult<LightHeader>;

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> BridgeResult<Vec<Log>>;
}

/// Root-chain contract surface the deciders need.
#[async_trait]
pub trait RootChain: Send + Sync {
    async fn checkpoint_head(&self) -> BridgeResult<ContractCheckpoint>;

    /// Relay a committed span back to the main chain.
    async fn commit_span(
        &self,
        vote_bytes: Vec<u8>,
        sigs: Vec<u8>,
        tx_bytes: Vec<u8>,
        proof: Vec<u8>,
    ) -> BridgeResult<H256>;
}

/// Child-chain queries feeding checkpoint roots and span decisions.
#[async_trait]
pub trait ChildChain: Send + Sync {
    async fn latest_block_number(&self) -> BridgeResult<u64>;

    async fn header_fields(&self, number: u64) -> BridgeResult<ChildHeaderFields>;
}

pub struct EthClient {
    provider: Arc<Provider<Http>>,
    chain_name: &'static str,
}

impl EthClient {
    pub fn new(rpc_url: &str, chain_name: &'static str) -> BridgeResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| BridgeError::Config(format!("invalid {chain_name} rpc url: {e}")))?;
        Ok(Self {
            provider: Arc::new(provider),
            chain_name,
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    /// Log connection info at startup.
    pub async fn describe(&self) -> BridgeResult<()> {
        let chain_id = self.provider.get_chainid().await?;
        let block_number = self.provider.get_block_number().await?;
        info!(
            chain = self.chain_name,
            %chain_id,
            %block_number,
            "connected to chain"
        );
        Ok(())
    }

    async fn header_by_number(&self, block: impl Into<ethers::types::BlockId>) -> BridgeResult<LightHeader> {
        let block = self
            .provider
            .get_block(block.into())
            .await?
            .ok_or_else(|| BridgeError::TransientRpc("header not found".to_string()))?;
        Ok(LightHeader {
            number: block.number.unwrap_or_default().as_u64(),
            time: block.timestamp.low_u64(),
        })
    }
}

#[async_trait]
impl MainChain for EthClient {
    async fn subscribe_new_heads(&self) -> BridgeResult<BoxStream<'static, BridgeResult<LightHeader>>> {
        let provider = self.provider.clone();
        let chain_name = self.chain_name;
        let (item_tx, item_rx) = mpsc::channel::<BridgeResult<LightHeader>>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<BridgeResult<()>>();

        tokio::spawn(async move {
            let mut watcher = match provider.watch_blocks().await {
                Ok(watcher) => {
                    let _ = ready_tx.send(Ok(()));
                    watcher
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(BridgeError::from(e)));
                    return;
                }
            };

            while let Some(hash) = watcher.next().await {
                let header = match provider.get_block(hash).await {
                    Ok(Some(block)) => LightHeader {
                        number: block.number.unwrap_or_default().as_u64(),
                        time: block.timestamp.low_u64(),
                    },
                    Ok(None) => {
                        debug!(chain = chain_name, ?hash, "watched block not yet available");
                        continue;
                    }
                    Err(e) => {
                        warn!(chain = chain_name, error = %e, "failed to fetch watched block");
                        continue;
                    }
                };
                if item_tx.send(Ok(header)).await.is_err() {
                    // Receiver dropped, component is shutting down
                    return;
                }
            }

            // The filter died underneath us; a subscription error after
            // success stops the whole component.
            let _ = item_tx
                .send(Err(BridgeError::TransientRpc(
                    "new-head subscription terminated".to_string(),
                )))
                .await;
        });

        ready_rx
            .await
            .map_err(|_| BridgeError::TransientRpc("subscription task died".to_string()))??;

        let stream = futures::stream::unfold(item_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn latest_header(&self) -> BridgeResult<LightHeader> {
        self.header_by_number(BlockNumber::Latest).await
    }

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> BridgeResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(addresses.to_vec());
        Ok(self.provider.get_logs(&filter).await?)
    }
}

#[async_trait]
impl ChildChain for EthClient {
    async fn latest_block_number(&self) -> BridgeResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn header_fields(&self, number: u64) -> BridgeResult<ChildHeaderFields> {
        let block = self
            .provider
            .get_block(number)
            .await?
            .ok_or_else(|| BridgeError::TransientRpc(format!("child block {number} not found")))?;
        Ok(ChildHeaderFields {
            number,
            time: block.timestamp.low_u64(),
            tx_root: block.transactions_root,
            receipts_root: block.receipts_root,
        })
    }
}

#[allow(deprecated)]
fn function(
    name: &str,
    inputs: Vec<(&str, ParamType)>,
    outputs: Vec<(&str, ParamType)>,
    state_mutability: StateMutability,
) -> Function {
    let params = |list: Vec<(&str, ParamType)>| {
        list.into_iter()
            .map(|(name, kind)| Param {
                name: name.to_string(),
                kind,
                internal_type: None,
            })
            .collect()
    };
    Function {
        name: name.to_string(),
        inputs: params(inputs),
        outputs: params(outputs),
        constant: None,
        state_mutability,
    }
}

static CURRENT_HEADER_BLOCK: Lazy<Function> = Lazy::new(|| {
    function(
        "currentHeaderBlock",
        vec![],
        vec![("", ParamType::Uint(256))],
        StateMutability::View,
    )
});

static HEADER_BLOCKS: Lazy<Function> = Lazy::new(|| {
    function(
        "headerBlocks",
        vec![("", ParamType::Uint(256))],
        vec![
            ("root", ParamType::FixedBytes(32)),
            ("start", ParamType::Uint(256)),
            ("end", ParamType::Uint(256)),
            ("createdAt", ParamType::Uint(256)),
            ("proposer", ParamType::Address),
        ],
        StateMutability::View,
    )
});

static COMMIT_SPAN: Lazy<Function> = Lazy::new(|| {
    function(
        "commitSpan",
        vec![
            ("voteBytes", ParamType::Bytes),
            ("sigs", ParamType::Bytes),
            ("txBytes", ParamType::Bytes),
            ("proofBytes", ParamType::Bytes),
        ],
        vec![],
        StateMutability::NonPayable,
    )
});

pub struct RootChainContract {
    provider: Arc<Provider<Http>>,
    address: Address,
    signer: SignerMiddleware<Provider<Http>, LocalWallet>,
}

impl RootChainContract {
    pub async fn new(
        provider: Arc<Provider<Http>>,
        address: Address,
        wallet: LocalWallet,
    ) -> BridgeResult<Self> {
        // Ride out transient RPC failures at startup before giving up
        let chain_id = match crate::retry_with_max_elapsed_time!(
            provider.get_chainid(),
            Duration::from_secs(30)
        ) {
            Ok(Ok(chain_id)) => chain_id.low_u64(),
            _ => {
                return Err(BridgeError::TransientRpc(
                    "failed to fetch main-chain id".to_string(),
                ))
            }
        };
        let signer = SignerMiddleware::new(
            provider.as_ref().clone(),
            wallet.with_chain_id(chain_id),
        );
        Ok(Self {
            provider,
            address,
            signer,
        })
    }

    async fn eth_call(&self, func: &Function, args: &[Token]) -> BridgeResult<Vec<Token>> {
        let data = func
            .encode_input(args)
            .map_err(|e| BridgeError::Generic(format!("encode {}: {e}", func.name)))?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.address)
            .data(data)
            .into();
        let output = self.provider.call(&tx, None).await?;
        func.decode_output(&output).map_err(|e| BridgeError::Decode {
            event: func.name.clone(),
            msg: e.to_string(),
        })
    }
}

fn output_u64(token: Option<Token>, what: &str) -> BridgeResult<u64> {
    token
        .and_then(|t| t.into_uint())
        .map(|v| v.low_u64())
        .ok_or_else(|| BridgeError::Decode {
            event: what.to_string(),
            msg: "expected uint output".to_string(),
        })
}

#[async_trait]
impl RootChain for RootChainContract {
    async fn checkpoint_head(&self) -> BridgeResult<ContractCheckpoint> {
        let current = output_u64(
            self.eth_call(&CURRENT_HEADER_BLOCK, &[]).await?.pop(),
            "currentHeaderBlock",
        )?;

        let mut out = self
            .eth_call(&HEADER_BLOCKS, &[Token::Uint(current.into())])
            .await?
            .into_iter();
        let root = out
            .next()
            .and_then(|t| t.into_fixed_bytes())
            .ok_or_else(|| BridgeError::Decode {
                event: "headerBlocks".to_string(),
                msg: "expected bytes32 root".to_string(),
            })?;
        let start = output_u64(out.next(), "headerBlocks.start")?;
        let end = output_u64(out.next(), "headerBlocks.end")?;
        let timestamp = output_u64(out.next(), "headerBlocks.createdAt")?;

        Ok(ContractCheckpoint {
            start,
            end,
            current_header_block: current,
            timestamp,
            root: H256::from_slice(&root),
        })
    }

    async fn commit_span(
        &self,
        vote_bytes: Vec<u8>,
        sigs: Vec<u8>,
        tx_bytes: Vec<u8>,
        proof: Vec<u8>,
    ) -> BridgeResult<H256> {
        let data = COMMIT_SPAN
            .encode_input(&[
                Token::Bytes(vote_bytes),
                Token::Bytes(sigs),
                Token::Bytes(tx_bytes),
                Token::Bytes(proof),
            ])
            .map_err(|e| BridgeError::Generic(format!("encode commitSpan: {e}")))?;
        let tx = TransactionRequest::new().to(self.address).data(data);
        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| BridgeError::TransientRpc(format!("commitSpan submission: {e}")))?;
        let hash = pending.tx_hash();
        info!(?hash, "commitSpan relayed to root chain");
        Ok(hash)
    }
}
