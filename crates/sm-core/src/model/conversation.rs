//! Conversation records and segment chunking.
//!
//! Conversations travel as **segments**: a contiguous message tail
//! `[offset, offset + count)` serialized, encrypted and signed once, then
//! split into byte-range chunks small enough for the archive.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SmError, SmResult};

/// Maximum byte length of one uploaded segment chunk (post-encryption).
pub const SEGMENT_CHUNK_BYTES: usize = 90 * 1024;
/// Per-chunk download cap on the pull side.
pub const SEGMENT_CHUNK_DOWNLOAD_CAP: usize = 100 * 1024;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Source client that produced a conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Client {
    #[serde(rename = "cursor")]
    Cursor,
    #[serde(rename = "claude-code")]
    ClaudeCode,
}

impl Client {
    pub fn as_str(&self) -> &'static str {
        match self {
            Client::Cursor => "cursor",
            Client::ClaudeCode => "claude-code",
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Client {
    type Err = SmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cursor" => Ok(Client::Cursor),
            "claude-code" => Ok(Client::ClaudeCode),
            other => Err(SmError::InvalidInput(format!("unknown client: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: serde_json::Value,
    /// Client-specific message fields, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub client: Client,
    pub project: String,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Plaintext payload of one uploaded segment: conversation metadata plus the
/// message tail `[offset, offset + count)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSegment {
    pub id: String,
    pub client: Client,
    pub project: String,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub offset: usize,
    pub count: usize,
    pub messages: Vec<Message>,
}

impl ConversationSegment {
    /// Cut the tail `[offset..]` of a conversation into a segment payload.
    /// Returns `None` when there is nothing new past `offset`.
    pub fn tail(conversation: &Conversation, offset: usize) -> Option<Self> {
        if offset >= conversation.messages.len() {
            return None;
        }
        let tail = conversation.messages[offset..].to_vec();
        Some(Self {
            id: conversation.id.clone(),
            client: conversation.client,
            project: conversation.project.clone(),
            started_at: conversation.started_at,
            updated_at: conversation.updated_at,
            offset,
            count: tail.len(),
            messages: tail,
        })
    }

    pub fn to_bytes(&self) -> SmResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SmResult<Self> {
        let segment: Self = serde_json::from_slice(bytes)?;
        if segment.count != segment.messages.len() {
            return Err(SmError::InvalidInput(format!(
                "segment count {} does not match {} messages",
                segment.count,
                segment.messages.len()
            )));
        }
        Ok(segment)
    }
}

/// Split an encrypted segment payload into `<= SEGMENT_CHUNK_BYTES` ranges.
/// Chunks are labeled `i/total` with 1-based `i`; reassembly concatenates in
/// chunk-index order.
pub fn split_segment_chunks(ciphertext: &[u8]) -> Vec<Vec<u8>> {
    if ciphertext.is_empty() {
        return Vec::new();
    }
    ciphertext
        .chunks(SEGMENT_CHUNK_BYTES)
        .map(|c| c.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(message_count: usize) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "sess-1".into(),
            client: Client::Cursor,
            project: "demo".into(),
            started_at: now,
            updated_at: now,
            messages: (0..message_count)
                .map(|i| Message::text("user", format!("m{i}")))
                .collect(),
        }
    }

    #[test]
    fn client_text_forms() {
        assert_eq!(Client::ClaudeCode.as_str(), "claude-code");
        assert_eq!("cursor".parse::<Client>().unwrap(), Client::Cursor);
        assert!("vim".parse::<Client>().is_err());
    }

    #[test]
    fn conversation_json_uses_camel_case_timestamps() {
        let json = serde_json::to_value(conversation(1)).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["client"], "cursor");
    }

    #[test]
    fn tail_cuts_from_offset() {
        let convo = conversation(10);
        let segment = ConversationSegment::tail(&convo, 7).unwrap();
        assert_eq!(segment.offset, 7);
        assert_eq!(segment.count, 3);
        assert_eq!(segment.messages[0].content, serde_json::json!("m7"));
    }

    #[test]
    fn tail_at_end_is_none() {
        let convo = conversation(4);
        assert!(ConversationSegment::tail(&convo, 4).is_none());
        assert!(ConversationSegment::tail(&convo, 9).is_none());
    }

    #[test]
    fn segment_count_mismatch_rejected() {
        let convo = conversation(3);
        let mut segment = ConversationSegment::tail(&convo, 0).unwrap();
        segment.count = 99;
        let bytes = serde_json::to_vec(&segment).unwrap();
        assert!(ConversationSegment::from_bytes(&bytes).is_err());
    }

    #[test]
    fn chunk_split_covers_all_bytes_in_order() {
        let payload: Vec<u8> = (0..(SEGMENT_CHUNK_BYTES * 2 + 100))
            .map(|i| (i % 251) as u8)
            .collect();
        let chunks = split_segment_chunks(&payload);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), SEGMENT_CHUNK_BYTES);
        assert_eq!(chunks[2].len(), 100);

        let reassembled: Vec<u8> = chunks.concat();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn empty_ciphertext_yields_no_chunks() {
        assert!(split_segment_chunks(&[]).is_empty());
    }
}
