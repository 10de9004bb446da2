//! Incremental conversation sync with per-session offset cursors.
//!
//! Each push uploads only the message tail past the stored cursor, as one
//! encrypted + signed segment split into byte-range chunks. The cursor
//! advances only after every chunk has uploaded, so a failed push retries
//! the same tail on the next tick.
//!
//! The cursor is indexed by message count, not message identity: a
//! transcript that is truncated or rewritten non-append-only will skip or
//! duplicate messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use sm_core::{
    meta, split_segment_chunks, tags, ArchiveIndex, Conversation, ConversationChunkRef,
    ConversationSegment, SmError, SmResult, Tag, UploadBackend, SEGMENT_CHUNK_DOWNLOAD_CAP,
};
use sm_storage::crypto;
use sm_storage::{FactStore, Keypair};

pub struct ConversationSync {
    store: Arc<FactStore>,
    archive: Arc<dyn ArchiveIndex>,
    uploader: Arc<dyn UploadBackend>,
    keypair: Keypair,
    aes_key: Zeroizing<[u8; crypto::KEY_SIZE]>,
}

#[derive(Debug, Clone)]
pub struct SegmentPush {
    pub session: String,
    pub offset: usize,
    pub count: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct WatchReport {
    pub conversations: usize,
    pub segments: usize,
    pub errors: Vec<String>,
}

impl ConversationSync {
    pub fn new(
        store: Arc<FactStore>,
        archive: Arc<dyn ArchiveIndex>,
        uploader: Arc<dyn UploadBackend>,
        keypair: Keypair,
        aes_key: Zeroizing<[u8; crypto::KEY_SIZE]>,
    ) -> Self {
        Self {
            store,
            archive,
            uploader,
            keypair,
            aes_key,
        }
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Upload the unsynced tail of one conversation. No-op when the cursor
    /// already covers every message.
    pub async fn push_conversation(
        &self,
        conversation: &Conversation,
    ) -> SmResult<Option<SegmentPush>> {
        let cursor_key =
            meta::conversation_offset(conversation.client.as_str(), &conversation.id);
        let last_synced = self.store.get_meta_u64(&cursor_key)? as usize;

        let Some(segment) = ConversationSegment::tail(conversation, last_synced) else {
            return Ok(None);
        };

        let plaintext = segment.to_bytes()?;
        let envelope = crypto::encrypt(&plaintext, &self.aes_key)?;
        // One signature over the full ciphertext, replicated on every chunk
        // so reassembly can verify before decrypting.
        let signature = crypto::sign(&envelope, &self.keypair.private_key)?;
        let timestamp = Utc::now().timestamp().to_string();

        let chunks = split_segment_chunks(&envelope);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let upload_tags = vec![
                Tag::new(tags::TAG_APP_NAME, tags::APP_NAME),
                Tag::new(tags::TAG_WALLET, &self.keypair.address),
                Tag::new(tags::TAG_TYPE, tags::TYPE_CONVERSATION),
                Tag::new(tags::TAG_CLIENT, conversation.client.as_str()),
                Tag::new(tags::TAG_PROJECT, &conversation.project),
                Tag::new(tags::TAG_SESSION, &conversation.id),
                Tag::new(tags::TAG_OFFSET, segment.offset.to_string()),
                Tag::new(tags::TAG_COUNT, segment.count.to_string()),
                Tag::new(tags::TAG_CHUNK, format!("{}/{}", i + 1, total)),
                Tag::new(tags::TAG_TIMESTAMP, &timestamp),
                Tag::new(tags::TAG_SIGNATURE, &signature),
                Tag::new(tags::TAG_CONTENT_TYPE, tags::CONTENT_TYPE_OCTET_STREAM),
            ];
            self.uploader.upload(chunk, &upload_tags).await?;
        }

        // All chunks confirmed — only now advance the cursor.
        self.store
            .set_meta(&cursor_key, &conversation.messages.len().to_string())?;

        tracing::info!(
            session = %conversation.id,
            offset = segment.offset,
            count = segment.count,
            chunks = total,
            "pushed conversation segment"
        );

        Ok(Some(SegmentPush {
            session: conversation.id.clone(),
            offset: segment.offset,
            count: segment.count,
            chunks: total,
        }))
    }

    /// Push every conversation in a batch; per-conversation failures are
    /// collected, not fatal to the batch.
    pub async fn push_all(&self, conversations: &[Conversation]) -> SmResult<WatchReport> {
        let mut report = WatchReport {
            conversations: conversations.len(),
            ..Default::default()
        };
        for conversation in conversations {
            match self.push_conversation(conversation).await {
                Ok(Some(_)) => report.segments += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session = %conversation.id, error = %e, "segment push failed");
                    report.errors.push(format!("{}: {e}", conversation.id));
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Reassemble every remote conversation for this wallet. Incomplete or
    /// invalid segments are dropped; overlapping segments keep the earlier
    /// (lower-offset) range.
    pub async fn pull_conversations(&self) -> SmResult<Vec<Conversation>> {
        let chunks = self
            .archive
            .query_conversation_chunks(&self.keypair.address)
            .await?;

        // Group chunks into segments.
        let mut groups: BTreeMap<SegmentGroupKey, Vec<ConversationChunkRef>> = BTreeMap::new();
        for chunk in chunks {
            groups
                .entry(SegmentGroupKey::of(&chunk))
                .or_default()
                .push(chunk);
        }

        let mut segments: Vec<ConversationSegment> = Vec::new();
        for (key, group) in groups {
            match self.reassemble_segment(&group).await {
                Ok(segment) => segments.push(segment),
                Err(e) => {
                    tracing::warn!(
                        session = %key.session,
                        offset = key.offset,
                        error = %e,
                        "dropping segment"
                    );
                }
            }
        }

        Ok(merge_segments(segments))
    }

    /// Validate completeness, download and concatenate chunks, verify the
    /// replicated signature once over the reassembled ciphertext, then
    /// decrypt and parse.
    async fn reassemble_segment(
        &self,
        group: &[ConversationChunkRef],
    ) -> SmResult<ConversationSegment> {
        let total = group[0].chunk_total;
        let mut indices: Vec<usize> = group.iter().map(|c| c.chunk_index).collect();
        indices.sort_unstable();
        indices.dedup();
        let complete = group.iter().all(|c| c.chunk_total == total)
            && indices.len() == total
            && indices.first() == Some(&1)
            && indices.last() == Some(&total);
        if !complete {
            return Err(SmError::InvalidInput(format!(
                "incomplete segment: {} of {total} chunks",
                indices.len()
            )));
        }

        let mut ordered: Vec<&ConversationChunkRef> = group.iter().collect();
        ordered.sort_by_key(|c| c.chunk_index);
        ordered.dedup_by_key(|c| c.chunk_index);

        let mut envelope = Vec::new();
        for chunk in &ordered {
            let bytes = self
                .archive
                .download(&chunk.tx_id, SEGMENT_CHUNK_DOWNLOAD_CAP)
                .await?;
            envelope.extend_from_slice(&bytes);
        }

        let signature = &group[0].signature;
        if !crypto::verify(&envelope, signature, &self.keypair.address) {
            return Err(SmError::SignatureInvalid("conversation segment".into()));
        }

        let plaintext = crypto::decrypt(&envelope, &self.aes_key)?;
        ConversationSegment::from_bytes(&plaintext)
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SegmentGroupKey {
    client: String,
    session: String,
    offset: usize,
    count: usize,
    timestamp: i64,
}

impl SegmentGroupKey {
    fn of(chunk: &ConversationChunkRef) -> Self {
        Self {
            client: chunk.client.as_str().to_string(),
            session: chunk.session.clone(),
            offset: chunk.offset,
            count: chunk.count,
            timestamp: chunk.timestamp,
        }
    }
}

/// Merge segments per `(client, session)`: ascending offset order, message
/// lists concatenated, overlapping ranges dropped in favor of the earlier
/// segment.
pub fn merge_segments(segments: Vec<ConversationSegment>) -> Vec<Conversation> {
    let mut by_session: BTreeMap<(String, String), Vec<ConversationSegment>> = BTreeMap::new();
    for segment in segments {
        by_session
            .entry((segment.client.as_str().to_string(), segment.id.clone()))
            .or_default()
            .push(segment);
    }

    let mut conversations = Vec::new();
    for (_, mut group) in by_session {
        group.sort_by_key(|s| s.offset);

        let first = &group[0];
        let mut merged = Conversation {
            id: first.id.clone(),
            client: first.client,
            project: first.project.clone(),
            started_at: first.started_at,
            updated_at: first.updated_at,
            messages: Vec::new(),
        };

        let mut covered = 0usize;
        for segment in group {
            if segment.offset < covered {
                tracing::debug!(
                    session = %segment.id,
                    offset = segment.offset,
                    covered,
                    "dropping overlapping segment"
                );
                continue;
            }
            covered = segment.offset + segment.count;
            if segment.updated_at > merged.updated_at {
                merged.updated_at = segment.updated_at;
            }
            merged.messages.extend(segment.messages);
        }

        conversations.push(merged);
    }
    conversations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sm_core::{Client, Message};

    fn segment(offset: usize, count: usize, label: &str) -> ConversationSegment {
        let now = Utc::now();
        ConversationSegment {
            id: "sess".into(),
            client: Client::Cursor,
            project: "demo".into(),
            started_at: now,
            updated_at: now,
            offset,
            count,
            messages: (0..count)
                .map(|i| Message::text("user", format!("{label}-{i}")))
                .collect(),
        }
    }

    #[test]
    fn merge_concatenates_in_offset_order() {
        let merged = merge_segments(vec![segment(10, 3, "b"), segment(0, 10, "a")]);
        assert_eq!(merged.len(), 1);
        let convo = &merged[0];
        assert_eq!(convo.messages.len(), 13);
        assert_eq!(convo.messages[0].content, serde_json::json!("a-0"));
        assert_eq!(convo.messages[10].content, serde_json::json!("b-0"));
    }

    #[test]
    fn merge_drops_overlapping_segment() {
        // Second segment overlaps [0, 10); the earlier lower-offset one wins.
        let merged = merge_segments(vec![
            segment(0, 10, "a"),
            segment(5, 10, "overlap"),
            segment(10, 2, "c"),
        ]);
        assert_eq!(merged[0].messages.len(), 12);
        assert!(merged[0]
            .messages
            .iter()
            .all(|m| m.content.as_str().unwrap().starts_with("a-")
                || m.content.as_str().unwrap().starts_with("c-")));
    }

    #[test]
    fn merge_keeps_sessions_separate() {
        let mut other = segment(0, 1, "x");
        other.id = "other-session".into();
        let merged = merge_segments(vec![segment(0, 2, "a"), other]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_tolerates_gaps() {
        // A missing middle segment leaves a gap; later messages still land.
        let merged = merge_segments(vec![segment(0, 2, "a"), segment(5, 2, "b")]);
        assert_eq!(merged[0].messages.len(), 4);
    }
}
