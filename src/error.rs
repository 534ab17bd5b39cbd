// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // Transient RPC/REST failure or timeout. The current tick is skipped and
    // the cursor is not advanced; the next tick retries.
    TransientRpc(String),
    // ABI unpack or JSON unmarshal failure for a single item
    Decode { event: String, msg: String },
    // Persistent store failure; the affected cursor reads as absent this tick
    Storage(String),
    // Fatal configuration problem at startup
    Config(String),
    // Awaiting a consensus-chain commit exceeded COMMIT_TIMEOUT
    Timeout(String),
    // Consensus-chain REST surface returned an unusable response
    Rest(String),
    // Consensus-chain transaction was rejected at CheckTx
    TxRejected { code: u32, log: String },
    // Uncategorized error
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::TransientRpc(_) => "transient_rpc",
            BridgeError::Decode { .. } => "decode",
            BridgeError::Storage(_) => "storage",
            BridgeError::Config(_) => "config",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::Rest(_) => "rest",
            BridgeError::TxRejected { .. } => "tx_rejected",
            BridgeError::Generic(_) => "generic",
        }
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::TransientRpc(e) => write!(f, "transient rpc error: {e}"),
            BridgeError::Decode { event, msg } => write!(f, "decode error for {event}: {msg}"),
            BridgeError::Storage(e) => write!(f, "storage error: {e}"),
            BridgeError::Config(e) => write!(f, "config error: {e}"),
            BridgeError::Timeout(e) => write!(f, "timeout: {e}"),
            BridgeError::Rest(e) => write!(f, "rest error: {e}"),
            BridgeError::TxRejected { code, log } => {
                write!(f, "tx rejected with code {code}: {log}")
            }
            BridgeError::Generic(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<ethers::providers::ProviderError> for BridgeError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        BridgeError::TransientRpc(e.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BridgeError::Timeout(e.to_string())
        } else {
            BridgeError::TransientRpc(e.to_string())
        }
    }
}

impl From<sled::Error> for BridgeError {
    fn from(e: sled::Error) -> Self {
        BridgeError::Storage(e.to_string())
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(e: url::ParseError) -> Self {
        BridgeError::Config(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
