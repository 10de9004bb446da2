//! Validated references to archive transactions.
//!
//! Gateway query results arrive as raw tag lists; everything here applies
//! the strict acceptance rules at the ingress boundary, so both the HTTP
//! adapter and test doubles share one filter.

use std::collections::HashMap;

use crate::model::conversation::Client;
use crate::model::shard::ShardKind;
use crate::tags;

/// Raw query hit: a transaction id plus its tags.
#[derive(Debug, Clone)]
pub struct TxMeta {
    pub id: String,
    pub block_height: Option<u64>,
    pub tags: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Shard references
// ---------------------------------------------------------------------------

/// An accepted `delta`/`snapshot`/`identity` transaction.
#[derive(Debug, Clone)]
pub struct ShardRef {
    pub tx_id: String,
    pub kind: ShardKind,
    /// Strictly positive for delta/snapshot; 0 for identity records.
    pub version: u64,
    pub wallet: String,
    pub signature: String,
    pub salt: Option<String>,
    pub block_height: Option<u64>,
}

impl ShardRef {
    /// Strict acceptance of one query hit. Returns `None` on any rule
    /// violation; callers skip silently.
    pub fn accept(meta: &TxMeta, wallet: &str) -> Option<Self> {
        let kind = ShardKind::parse(meta.tags.get(tags::TAG_TYPE)?)?;

        let tagged_wallet = meta.tags.get(tags::TAG_WALLET)?;
        if !tagged_wallet.eq_ignore_ascii_case(wallet) {
            return None;
        }

        let signature = meta.tags.get(tags::TAG_SIGNATURE)?;
        if signature.is_empty() {
            return None;
        }

        let version = match kind {
            ShardKind::Identity => 0,
            ShardKind::Delta | ShardKind::Snapshot => {
                let version: u64 = meta.tags.get(tags::TAG_VERSION)?.parse().ok()?;
                if version < 1 {
                    return None;
                }
                version
            }
        };

        Some(Self {
            tx_id: meta.id.clone(),
            kind,
            version,
            wallet: tagged_wallet.clone(),
            signature: signature.clone(),
            salt: meta.tags.get(tags::TAG_SALT).cloned(),
            block_height: meta.block_height,
        })
    }
}

/// Filter, deduplicate (by transaction id), and sort query hits into the
/// canonical replay order: `Version` ascending, stable.
pub fn accept_shards(hits: &[TxMeta], wallet: &str) -> Vec<ShardRef> {
    let mut seen = std::collections::HashSet::new();
    let mut refs: Vec<ShardRef> = hits
        .iter()
        .filter_map(|meta| ShardRef::accept(meta, wallet))
        .filter(|r| seen.insert(r.tx_id.clone()))
        .collect();
    refs.sort_by_key(|r| r.version);
    refs
}

// ---------------------------------------------------------------------------
// Conversation chunk references
// ---------------------------------------------------------------------------

/// An accepted `conversation` chunk transaction.
#[derive(Debug, Clone)]
pub struct ConversationChunkRef {
    pub tx_id: String,
    pub client: Client,
    pub project: String,
    pub session: String,
    pub offset: usize,
    pub count: usize,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub timestamp: i64,
    pub signature: String,
}

impl ConversationChunkRef {
    pub fn accept(meta: &TxMeta, wallet: &str) -> Option<Self> {
        if meta.tags.get(tags::TAG_TYPE)?.as_str() != tags::TYPE_CONVERSATION {
            return None;
        }
        let tagged_wallet = meta.tags.get(tags::TAG_WALLET)?;
        if !tagged_wallet.eq_ignore_ascii_case(wallet) {
            return None;
        }
        let client: Client = meta.tags.get(tags::TAG_CLIENT)?.parse().ok()?;
        let project = meta.tags.get(tags::TAG_PROJECT)?;
        let session = meta.tags.get(tags::TAG_SESSION)?;
        if project.is_empty() || session.is_empty() {
            return None;
        }
        let (chunk_index, chunk_total) =
            tags::parse_chunk_label(meta.tags.get(tags::TAG_CHUNK)?)?;
        let offset: usize = meta.tags.get(tags::TAG_OFFSET)?.parse().ok()?;
        let count: usize = meta.tags.get(tags::TAG_COUNT)?.parse().ok()?;
        let timestamp: i64 = meta
            .tags
            .get(tags::TAG_TIMESTAMP)
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let signature = meta.tags.get(tags::TAG_SIGNATURE)?;
        if signature.is_empty() {
            return None;
        }

        Some(Self {
            tx_id: meta.id.clone(),
            client,
            project: project.clone(),
            session: session.clone(),
            offset,
            count,
            chunk_index,
            chunk_total,
            timestamp,
            signature: signature.clone(),
        })
    }
}

/// Accept and sort conversation chunks by `(session, offset, chunkIndex,
/// timestamp)`.
pub fn accept_conversation_chunks(hits: &[TxMeta], wallet: &str) -> Vec<ConversationChunkRef> {
    let mut seen = std::collections::HashSet::new();
    let mut refs: Vec<ConversationChunkRef> = hits
        .iter()
        .filter_map(|meta| ConversationChunkRef::accept(meta, wallet))
        .filter(|r| seen.insert(r.tx_id.clone()))
        .collect();
    refs.sort_by(|a, b| {
        (&a.session, a.offset, a.chunk_index, a.timestamp)
            .cmp(&(&b.session, b.offset, b.chunk_index, b.timestamp))
    });
    refs
}

// ---------------------------------------------------------------------------
// Share references
// ---------------------------------------------------------------------------

/// A resolved `conversation-share` transaction. `wallet`/`signature` are
/// optional: a legacy share without them is still downloadable, the
/// encryption key alone proving authorization.
#[derive(Debug, Clone)]
pub struct ShareRef {
    pub tx_id: String,
    pub wallet: Option<String>,
    pub signature: Option<String>,
}

impl ShareRef {
    pub fn from_meta(meta: &TxMeta) -> Self {
        Self {
            tx_id: meta.id.clone(),
            wallet: meta.tags.get(tags::TAG_WALLET).cloned(),
            signature: meta.tags.get(tags::TAG_SIGNATURE).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, pairs: &[(&str, &str)]) -> TxMeta {
        TxMeta {
            id: id.into(),
            block_height: Some(1),
            tags: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn shard_hit(id: &str, kind: &str, version: &str) -> TxMeta {
        hit(
            id,
            &[
                (tags::TAG_TYPE, kind),
                (tags::TAG_WALLET, "WALLET1"),
                (tags::TAG_SIGNATURE, "abcd"),
                (tags::TAG_VERSION, version),
            ],
        )
    }

    // -- Shard acceptance ------------------------------------------------------

    #[test]
    fn accepts_valid_delta() {
        let r = ShardRef::accept(&shard_hit("tx1", "delta", "3"), "wallet1").unwrap();
        assert_eq!(r.kind, ShardKind::Delta);
        assert_eq!(r.version, 3);
    }

    #[test]
    fn wallet_comparison_is_case_insensitive() {
        assert!(ShardRef::accept(&shard_hit("tx1", "delta", "1"), "wallet1").is_some());
        assert!(ShardRef::accept(&shard_hit("tx1", "delta", "1"), "other").is_none());
    }

    #[test]
    fn rejects_bad_type_version_or_signature() {
        assert!(ShardRef::accept(&shard_hit("t", "conversation", "1"), "wallet1").is_none());
        assert!(ShardRef::accept(&shard_hit("t", "delta", "0"), "wallet1").is_none());
        assert!(ShardRef::accept(&shard_hit("t", "delta", "nope"), "wallet1").is_none());

        let mut no_sig = shard_hit("t", "delta", "1");
        no_sig.tags.insert(tags::TAG_SIGNATURE.into(), String::new());
        assert!(ShardRef::accept(&no_sig, "wallet1").is_none());

        let mut missing_sig = shard_hit("t", "delta", "1");
        missing_sig.tags.remove(tags::TAG_SIGNATURE);
        assert!(ShardRef::accept(&missing_sig, "wallet1").is_none());
    }

    #[test]
    fn identity_defaults_to_version_zero() {
        let mut meta = shard_hit("t", "identity", "ignored");
        meta.tags.remove(tags::TAG_VERSION);
        meta.tags.insert(tags::TAG_SALT.into(), "aa".into());
        let r = ShardRef::accept(&meta, "wallet1").unwrap();
        assert_eq!(r.version, 0);
        assert_eq!(r.salt.as_deref(), Some("aa"));
    }

    #[test]
    fn accept_shards_dedupes_and_sorts_by_version() {
        let hits = vec![
            shard_hit("tx3", "delta", "3"),
            shard_hit("tx1", "delta", "1"),
            shard_hit("tx1", "delta", "1"), // duplicate tx id
            shard_hit("tx2", "snapshot", "2"),
        ];
        let refs = accept_shards(&hits, "wallet1");
        let versions: Vec<u64> = refs.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    // -- Conversation chunk acceptance -----------------------------------------

    fn chunk_hit(id: &str, session: &str, offset: &str, chunk: &str) -> TxMeta {
        hit(
            id,
            &[
                (tags::TAG_TYPE, tags::TYPE_CONVERSATION),
                (tags::TAG_WALLET, "wallet1"),
                (tags::TAG_CLIENT, "cursor"),
                (tags::TAG_PROJECT, "demo"),
                (tags::TAG_SESSION, session),
                (tags::TAG_OFFSET, offset),
                (tags::TAG_COUNT, "2"),
                (tags::TAG_CHUNK, chunk),
                (tags::TAG_TIMESTAMP, "100"),
                (tags::TAG_SIGNATURE, "ff"),
            ],
        )
    }

    #[test]
    fn accepts_valid_chunk() {
        let r = ConversationChunkRef::accept(&chunk_hit("t", "s1", "0", "1/2"), "wallet1").unwrap();
        assert_eq!(r.chunk_index, 1);
        assert_eq!(r.chunk_total, 2);
        assert_eq!(r.offset, 0);
    }

    #[test]
    fn rejects_invalid_chunk_labels_and_fields() {
        assert!(
            ConversationChunkRef::accept(&chunk_hit("t", "s1", "0", "0/2"), "wallet1").is_none()
        );
        assert!(
            ConversationChunkRef::accept(&chunk_hit("t", "s1", "-1", "1/1"), "wallet1").is_none()
        );
        assert!(ConversationChunkRef::accept(&chunk_hit("t", "", "0", "1/1"), "wallet1").is_none());

        let mut bad_client = chunk_hit("t", "s1", "0", "1/1");
        bad_client.tags.insert(tags::TAG_CLIENT.into(), "emacs".into());
        assert!(ConversationChunkRef::accept(&bad_client, "wallet1").is_none());
    }

    #[test]
    fn chunks_sort_by_session_offset_index() {
        let hits = vec![
            chunk_hit("a", "s2", "0", "1/1"),
            chunk_hit("b", "s1", "10", "2/2"),
            chunk_hit("c", "s1", "10", "1/2"),
            chunk_hit("d", "s1", "0", "1/1"),
        ];
        let refs = accept_conversation_chunks(&hits, "wallet1");
        let order: Vec<(&str, usize, usize)> = refs
            .iter()
            .map(|r| (r.session.as_str(), r.offset, r.chunk_index))
            .collect();
        assert_eq!(
            order,
            vec![("s1", 0, 1), ("s1", 10, 1), ("s1", 10, 2), ("s2", 0, 1)]
        );
    }
}
