// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

//! Persistent cursor store.
//!
//! A single shared key/value store holding monotone scan progress. Values are
//! decimal-ASCII unsigned integers so the on-disk layout stays inspectable
//! with any sled dump tool. A corrupt value reads as absent; the affected
//! stream re-derives its position on the next tick.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

const LAST_BLOCK_KEY: &[u8] = b"last-block";
const SPAN_KEY: &[u8] = b"span-key";

#[derive(Clone)]
pub struct BridgeStore {
    db: Arc<sled::Db>,
}

impl BridgeStore {
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| BridgeError::Storage(format!("failed to open bridge db: {e}")))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Last main-chain height whose logs were fully dispatched.
    pub fn last_block(&self) -> BridgeResult<Option<u64>> {
        self.read_u64(LAST_BLOCK_KEY)
    }

    pub fn set_last_block(&self, height: u64) -> BridgeResult<()> {
        self.write_u64(LAST_BLOCK_KEY, height)
    }

    /// Last span id this validator proposed.
    pub fn last_span(&self) -> BridgeResult<Option<u64>> {
        self.read_u64(SPAN_KEY)
    }

    pub fn set_last_span(&self, span_id: u64) -> BridgeResult<()> {
        self.write_u64(SPAN_KEY, span_id)
    }

    fn read_u64(&self, key: &[u8]) -> BridgeResult<Option<u64>> {
        let Some(raw) = self.db.get(key)? else {
            return Ok(None);
        };
        match std::str::from_utf8(&raw).ok().and_then(|s| s.parse().ok()) {
            Some(value) => Ok(Some(value)),
            None => {
                // Corrupt and absent are equivalent: the cursor is re-derived
                // from the next confirmed range.
                debug!(
                    key = %String::from_utf8_lossy(key),
                    "unparseable cursor value, treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn write_u64(&self, key: &[u8], value: u64) -> BridgeResult<()> {
        self.db.insert(key, value.to_string().as_bytes())?;
        // The write must be durable before the next external side effect.
        self.db.flush()?;
        Ok(())
    }
}
