// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Consensus-chain clients.
//!
//! Two surfaces: the REST API (checkpoint buffer/latest, span queries) and
//! the node RPC (tx broadcast, tx lookup with merkle proof, commit data).
//! Every REST response arrives wrapped as `{ result, height }` with a
//! JSON-encoded `result`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ethers::types::{Address, H256};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{
    CheckpointBlockHeader, CommitData, HeimdallCheckpoint, NextSpanInfo, ResponseWithHeight, Span,
    TxCommit, TxProof, ValidatorInfo,
};

/// Hard cap on awaiting a consensus-chain commit.
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

const COMMIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-request timeout. Bounded well under [`COMMIT_TIMEOUT`] so no request
/// outlives a cancelled scope by more than this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("default reqwest client")
}

pub const BUFFERED_CHECKPOINT_PATH: &str = "checkpoints/buffer";
pub const LATEST_CHECKPOINT_PATH: &str = "checkpoints/latest";
pub const LATEST_SPAN_PATH: &str = "bor/latest-span";
pub const SPAN_PROPOSER_PATH: &str = "bor/span-proposer";
pub const NEXT_SPAN_INFO_PATH: &str = "bor/next-span-info";

/// Consensus-chain REST queries the deciders depend on.
#[async_trait]
pub trait ConsensusRest: Send + Sync {
    /// The proposal sitting in the chain's in-memory buffer; `found == false`
    /// when the buffer is empty (404).
    async fn buffered_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint>;

    /// The last consensus-committed checkpoint.
    async fn committed_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint>;

    async fn latest_span(&self) -> BridgeResult<Span>;

    async fn span_proposer(&self) -> BridgeResult<ValidatorInfo>;

    async fn next_span_info(
        &self,
        start_block: u64,
        chain_id: &str,
        proposer: Address,
    ) -> BridgeResult<NextSpanInfo>;
}

/// Consensus-chain transaction surface.
#[async_trait]
pub trait ConsensusRpc: Send + Sync {
    /// Submit in "sync" mode: wait for CheckTx acceptance, not commit.
    async fn broadcast_tx_sync(&self, tx_bytes: Vec<u8>) -> BridgeResult<H256>;

    /// Await the commit of a broadcast tx, bounded by [`COMMIT_TIMEOUT`].
    async fn wait_for_commit(&self, hash: H256) -> BridgeResult<TxCommit>;

    async fn tx_with_proof(&self, hash: H256) -> BridgeResult<TxProof>;

    /// Precommit votes and signatures proving the commit at `height`.
    async fn commit_data(&self, height: u64) -> BridgeResult<CommitData>;
}

pub struct HeimdallRestClient {
    base: Url,
    http: reqwest::Client,
}

impl HeimdallRestClient {
    pub fn new(base_url: &str) -> BridgeResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| BridgeError::Config(format!("invalid heimdall rest url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            http: http_client(),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> BridgeResult<Option<T>> {
        let url = self.base.join(path)?;
        debug!(%url, "fetching from heimdall rest");
        let resp = self.http.get(url).query(query).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BridgeError::Rest(format!(
                "heimdall rest {path} returned {}",
                resp.status()
            )));
        }
        let wrapped: ResponseWithHeight = resp.json().await?;
        unwrap_result(wrapped).map(Some)
    }
}

/// Unwrap the `{ result, height }` envelope into the inner type.
pub(crate) fn unwrap_result<T: DeserializeOwned>(wrapped: ResponseWithHeight) -> BridgeResult<T> {
    serde_json::from_value(wrapped.result).map_err(|e| BridgeError::Rest(e.to_string()))
}

#[async_trait]
impl ConsensusRest for HeimdallRestClient {
    async fn buffered_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint> {
        let checkpoint: Option<CheckpointBlockHeader> =
            self.fetch(BUFFERED_CHECKPOINT_PATH, &[]).await?;
        Ok(match checkpoint {
            Some(c) => HeimdallCheckpoint::new(c.start_block, c.end_block),
            None => HeimdallCheckpoint::not_found(),
        })
    }

    async fn committed_checkpoint(&self) -> BridgeResult<HeimdallCheckpoint> {
        let checkpoint: Option<CheckpointBlockHeader> =
            self.fetch(LATEST_CHECKPOINT_PATH, &[]).await?;
        Ok(match checkpoint {
            Some(c) => HeimdallCheckpoint::new(c.start_block, c.end_block),
            None => HeimdallCheckpoint::not_found(),
        })
    }

    async fn latest_span(&self) -> BridgeResult<Span> {
        self.fetch(LATEST_SPAN_PATH, &[])
            .await?
            .ok_or_else(|| BridgeError::Rest("no span on record".to_string()))
    }

    async fn span_proposer(&self) -> BridgeResult<ValidatorInfo> {
        self.fetch(SPAN_PROPOSER_PATH, &[])
            .await?
            .ok_or_else(|| BridgeError::Rest("no span proposer on record".to_string()))
    }

    async fn next_span_info(
        &self,
        start_block: u64,
        chain_id: &str,
        proposer: Address,
    ) -> BridgeResult<NextSpanInfo> {
        let query = [
            ("start_block", start_block.to_string()),
            ("chain_id", chain_id.to_string()),
            ("proposer", format!("0x{proposer:x}")),
        ];
        self.fetch(NEXT_SPAN_INFO_PATH, &query)
            .await?
            .ok_or_else(|| BridgeError::Rest("no next span info".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BroadcastTxWire {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    hash: String,
}

#[derive(Debug, Deserialize)]
pub struct TxWire {
    pub height: String,
    pub tx: String,
    #[serde(default)]
    pub proof: Option<TxProofWire>,
}

#[derive(Debug, Deserialize)]
pub struct TxProofWire {
    #[serde(default)]
    pub root_hash: String,
    pub proof: MerkleProofWire,
}

#[derive(Debug, Deserialize)]
pub struct MerkleProofWire {
    #[serde(default)]
    pub aunts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommitWire {
    signed_header: SignedHeaderWire,
}

#[derive(Debug, Deserialize)]
struct SignedHeaderWire {
    header: CommitHeaderWire,
    commit: CommitInnerWire,
}

#[derive(Debug, Deserialize)]
struct CommitHeaderWire {
    chain_id: String,
}

#[derive(Debug, Deserialize)]
struct CommitInnerWire {
    #[serde(default)]
    height: String,
    #[serde(default)]
    round: i64,
    #[serde(default)]
    block_id: serde_json::Value,
    #[serde(default)]
    signatures: Vec<CommitSigWire>,
}

#[derive(Debug, Deserialize)]
struct CommitSigWire {
    #[serde(default)]
    signature: Option<String>,
}

pub struct HeimdallRpcClient {
    url: Url,
    http: reqwest::Client,
}

impl HeimdallRpcClient {
    pub fn new(rpc_url: &str) -> BridgeResult<Self> {
        let url = Url::parse(rpc_url)
            .map_err(|e| BridgeError::Config(format!("invalid heimdall rpc url: {e}")))?;
        Ok(Self {
            url,
            http: http_client(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> BridgeResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": method,
            "params": params,
        });
        let resp: JsonRpcResponse = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = resp.error {
            return Err(BridgeError::Rest(format!("rpc {method} failed: {error}")));
        }
        serde_json::from_value(resp.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| BridgeError::Rest(format!("rpc {method} result: {e}")))
    }

    async fn query_tx(&self, hash: H256, prove: bool) -> BridgeResult<TxWire> {
        self.call(
            "tx",
            json!({ "hash": BASE64.encode(hash.as_bytes()), "prove": prove }),
        )
        .await
    }

    /// Search committed txs by tags. The node's query language is boolean
    /// `AND` joins over tag strings, see [`join_tags`].
    pub async fn tx_search(
        &self,
        query: &str,
        prove: bool,
        page: u64,
        limit: u64,
    ) -> BridgeResult<TxSearchResult> {
        if query.is_empty() {
            return Err(BridgeError::Rest(
                "must declare at least one tag to search".to_string(),
            ));
        }
        self.call(
            "tx_search",
            json!({
                "query": query,
                "prove": prove,
                "page": page.to_string(),
                "per_page": limit.to_string(),
            }),
        )
        .await
    }
}

/// Join search tags into the node's query language.
pub fn join_tags(tags: &[&str]) -> String {
    tags.join(" AND ")
}

#[derive(Debug, Deserialize)]
pub struct TxSearchResult {
    #[serde(default)]
    pub txs: Vec<TxWire>,
    #[serde(default)]
    pub total_count: String,
}

pub(crate) fn parse_height(height: &str) -> BridgeResult<u64> {
    height
        .parse()
        .map_err(|e| BridgeError::Rest(format!("unparseable height {height:?}: {e}")))
}

pub(crate) fn parse_hash(hash: &str) -> BridgeResult<H256> {
    let raw = hex::decode(hash.trim_start_matches("0x"))
        .map_err(|e| BridgeError::Rest(format!("unparseable tx hash {hash:?}: {e}")))?;
    if raw.len() != 32 {
        return Err(BridgeError::Rest(format!(
            "tx hash {hash:?} is {} bytes, expected 32",
            raw.len()
        )));
    }
    Ok(H256::from_slice(&raw))
}

pub(crate) fn parse_tx_proof(wire: TxWire) -> BridgeResult<TxProof> {
    let proof = wire
        .proof
        .ok_or_else(|| BridgeError::Rest("tx result carries no proof".to_string()))?;
    let tx = BASE64
        .decode(&wire.tx)
        .map_err(|e| BridgeError::Rest(format!("tx bytes: {e}")))?;
    let mut siblings = Vec::with_capacity(proof.proof.aunts.len());
    for aunt in &proof.proof.aunts {
        let raw = BASE64
            .decode(aunt)
            .map_err(|e| BridgeError::Rest(format!("proof sibling: {e}")))?;
        let hash: [u8; 32] = raw
            .try_into()
            .map_err(|_| BridgeError::Rest("proof sibling is not 32 bytes".to_string()))?;
        siblings.push(hash);
    }
    let root = if proof.root_hash.is_empty() {
        [0u8; 32]
    } else {
        hex::decode(&proof.root_hash)
            .ok()
            .and_then(|raw| <[u8; 32]>::try_from(raw).ok())
            .ok_or_else(|| BridgeError::Rest("unparseable proof root".to_string()))?
    };
    Ok(TxProof { tx, siblings, root })
}

#[async_trait]
impl ConsensusRpc for HeimdallRpcClient {
    async fn broadcast_tx_sync(&self, tx_bytes: Vec<u8>) -> BridgeResult<H256> {
        let wire: BroadcastTxWire = self
            .call(
                "broadcast_tx_sync",
                json!({ "tx": BASE64.encode(&tx_bytes) }),
            )
            .await?;
        if wire.code != 0 {
            return Err(BridgeError::TxRejected {
                code: wire.code,
                log: wire.log,
            });
        }
        parse_hash(&wire.hash)
    }

    async fn wait_for_commit(&self, hash: H256) -> BridgeResult<TxCommit> {
        let poll = async {
            loop {
                match self.query_tx(hash, false).await {
                    Ok(wire) => {
                        let height = parse_height(&wire.height)?;
                        return Ok(TxCommit { height, hash });
                    }
                    Err(e) => {
                        debug!(?hash, error = %e, "tx not yet committed");
                        tokio::time::sleep(COMMIT_POLL_INTERVAL).await;
                    }
                }
            }
        };
        tokio::time::timeout(COMMIT_TIMEOUT, poll)
            .await
            .map_err(|_| {
                BridgeError::Timeout(format!(
                    "tx {hash:?} not committed within {COMMIT_TIMEOUT:?}"
                ))
            })?
    }

    async fn tx_with_proof(&self, hash: H256) -> BridgeResult<TxProof> {
        let wire = self.query_tx(hash, true).await?;
        parse_tx_proof(wire)
    }

    async fn commit_data(&self, height: u64) -> BridgeResult<CommitData> {
        // Precommits for height H land in the commit carried at H + 1.
        let wire: CommitWire = self
            .call("commit", json!({ "height": (height + 1).to_string() }))
            .await?;
        let chain_id = wire.signed_header.header.chain_id;
        let commit = wire.signed_header.commit;

        let mut sigs = Vec::new();
        for sig in &commit.signatures {
            if let Some(encoded) = &sig.signature {
                let raw = BASE64
                    .decode(encoded)
                    .map_err(|e| BridgeError::Rest(format!("commit signature: {e}")))?;
                sigs.extend_from_slice(&raw);
            }
        }

        let vote_bytes = serde_json::to_vec(&json!({
            "type": 2,
            "height": commit.height,
            "round": commit.round,
            "block_id": commit.block_id,
            "chain_id": chain_id,
        }))
        .map_err(|e| BridgeError::Rest(format!("vote encoding: {e}")))?;

        Ok(CommitData {
            vote_bytes,
            sigs,
            chain_id,
        })
    }
}
