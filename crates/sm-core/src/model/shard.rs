//! Shard JSON codec and size-budgeted chunking.
//!
//! A shard is the unit uploaded to the archive: a version-stamped, ordered
//! list of operations. Downloaded shard bytes are untrusted input — the op
//! enum rejects unknown discriminators, and unknown top-level fields are
//! preserved so re-emitting a downloaded shard is lossless.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SmError, SmResult};
use crate::model::fact::Fact;

/// Creation budget for a serialized + encrypted shard payload.
pub const SHARD_PAYLOAD_BUDGET: usize = 90 * 1024;
/// AES-256-GCM envelope overhead: 12-byte nonce + 16-byte tag.
pub const ENVELOPE_OVERHEAD: usize = 12 + 16;
/// Pull-side download cap; wider than the creation budget to tolerate
/// encryption overhead growth.
pub const SHARD_DOWNLOAD_CAP: usize = 100 * 1024;
/// Download cap for identity records.
pub const IDENTITY_DOWNLOAD_CAP: usize = 16 * 1024;
/// Download cap for shared conversation payloads.
pub const SHARE_DOWNLOAD_CAP: usize = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Shard model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardKind {
    Delta,
    Snapshot,
    Identity,
}

impl ShardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardKind::Delta => "delta",
            ShardKind::Snapshot => "snapshot",
            ShardKind::Identity => "identity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delta" => Some(ShardKind::Delta),
            "snapshot" => Some(ShardKind::Snapshot),
            "identity" => Some(ShardKind::Identity),
            _ => None,
        }
    }
}

/// One operation inside a shard. Internally tagged; an unknown `op` value
/// fails deserialization of the whole shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ShardOp {
    Upsert { fact: Fact },
    Delete { key: String },
}

impl ShardOp {
    /// Build an upsert op from a fact. Serialization strips the local-only
    /// `dirty` flag via the serde skip on `Fact`.
    pub fn upsert(fact: Fact) -> Self {
        ShardOp::Upsert { fact }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        ShardOp::Delete { key: key.into() }
    }

    /// The fact key this op touches.
    pub fn key(&self) -> &str {
        match self {
            ShardOp::Upsert { fact } => &fact.key,
            ShardOp::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_version: u64,
    pub shard_id: String,
    #[serde(rename = "type")]
    pub kind: ShardKind,
    pub operations: Vec<ShardOp>,
    /// Unknown fields from downloaded shards, preserved on re-emit.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Shard {
    pub fn new(shard_version: u64, shard_id: impl Into<String>, kind: ShardKind) -> Self {
        Self {
            shard_version,
            shard_id: shard_id.into(),
            kind,
            operations: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> SmResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Strict deserialization of untrusted downloaded bytes.
    pub fn from_bytes(bytes: &[u8]) -> SmResult<Self> {
        let shard: Shard = serde_json::from_slice(bytes)?;
        if shard.operations.is_empty() && shard.kind != ShardKind::Identity {
            return Err(SmError::InvalidInput("shard carries no operations".into()));
        }
        Ok(shard)
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Greedy bin-pack a flat op list into one or more shards so that every
/// serialized payload stays within the creation budget after encryption.
///
/// A new shard (with the next version) starts when the pending op would
/// overflow the budget. Every shard carries at least one op, so a single
/// oversized op still produces a shard rather than an error.
pub fn create_chunked_shards(
    ops: Vec<ShardOp>,
    start_version: u64,
    shard_id_seed: &str,
) -> SmResult<Vec<Shard>> {
    if ops.is_empty() {
        return Ok(Vec::new());
    }

    let plaintext_budget = SHARD_PAYLOAD_BUDGET - ENVELOPE_OVERHEAD;
    let mut shards: Vec<Shard> = Vec::new();
    let mut version = start_version;
    let mut current = Shard::new(version, format!("{shard_id_seed}-{version}"), ShardKind::Delta);
    // Serialized size of the shard skeleton with an empty op list; the
    // `[]` the empty list contributes is subtracted when ops accumulate.
    let mut base = current.to_bytes()?.len() - 2;
    let mut body = 0usize;

    for op in ops {
        let op_len = serde_json::to_vec(&op)?.len();
        let sep = if current.operations.is_empty() { 0 } else { 1 };
        let projected = base + 2 + body + sep + op_len;
        if !current.operations.is_empty() && projected > plaintext_budget {
            shards.push(current);
            version += 1;
            current = Shard::new(version, format!("{shard_id_seed}-{version}"), ShardKind::Delta);
            base = current.to_bytes()?.len() - 2;
            body = 0;
        }
        let sep = if current.operations.is_empty() { 0 } else { 1 };
        body += sep + op_len;
        current.operations.push(op);
    }
    shards.push(current);

    Ok(shards)
}
