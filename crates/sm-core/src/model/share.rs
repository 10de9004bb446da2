//! Share tokens: out-of-band distribution of one-shot encrypted payloads.
//!
//! The token is `base64url(JSON {v, sid, k, t?})` wrapped as
//! `sharme://share/<token>`. The key `k` is the 32-byte payload key; `t` is
//! an optional transaction id for direct download.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SmError, SmResult};
use crate::model::conversation::Conversation;

pub const SHARE_KEY_LEN: usize = 32;
pub const SHARE_URL_PREFIX: &str = "sharme://share/";

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareToken {
    pub v: u8,
    /// Share id (UUID), the archive lookup key.
    pub sid: String,
    /// base64url-encoded 32-byte payload key.
    pub k: String,
    /// Transaction id for direct download, when known at issue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl ShareToken {
    pub fn new(sid: impl Into<String>, key: &[u8; SHARE_KEY_LEN], tx_id: Option<String>) -> Self {
        Self {
            v: 1,
            sid: sid.into(),
            k: BASE64URL.encode(key),
            t: tx_id,
        }
    }

    pub fn encode(&self) -> SmResult<String> {
        Ok(BASE64URL.encode(serde_json::to_vec(self)?))
    }

    pub fn to_url(&self) -> SmResult<String> {
        Ok(format!("{SHARE_URL_PREFIX}{}", self.encode()?))
    }

    /// Decode and validate a bare token string.
    pub fn decode(token: &str) -> SmResult<Self> {
        let raw = BASE64URL
            .decode(token.trim())
            .map_err(|e| SmError::InvalidToken(format!("base64 decode: {e}")))?;
        let parsed: ShareToken = serde_json::from_slice(&raw)
            .map_err(|e| SmError::InvalidToken(format!("token json: {e}")))?;
        if parsed.v != 1 {
            return Err(SmError::InvalidToken(format!(
                "unsupported token version: {}",
                parsed.v
            )));
        }
        if parsed.sid.is_empty() {
            return Err(SmError::InvalidToken("empty share id".into()));
        }
        parsed.key_bytes()?;
        Ok(parsed)
    }

    /// Parse a `sharme://share/...` URL (token as path tail or `token=`
    /// query parameter) or a bare token.
    pub fn parse_url(input: &str) -> SmResult<Self> {
        let input = input.trim();
        let token = match input.strip_prefix(SHARE_URL_PREFIX) {
            Some(tail) => match tail.split_once('?') {
                Some((path, query)) => {
                    if path.is_empty() {
                        query
                            .split('&')
                            .find_map(|kv| kv.strip_prefix("token="))
                            .ok_or_else(|| {
                                SmError::InvalidToken("missing token parameter".into())
                            })?
                    } else {
                        path
                    }
                }
                None => tail,
            },
            None => input,
        };
        if token.is_empty() {
            return Err(SmError::InvalidToken("empty token".into()));
        }
        Self::decode(token)
    }

    /// The 32-byte payload key.
    pub fn key_bytes(&self) -> SmResult<[u8; SHARE_KEY_LEN]> {
        let raw = BASE64URL
            .decode(&self.k)
            .map_err(|e| SmError::InvalidToken(format!("key decode: {e}")))?;
        let bytes: [u8; SHARE_KEY_LEN] = raw
            .try_into()
            .map_err(|_| SmError::InvalidToken("share key must be 32 bytes".into()))?;
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Plaintext payload of a conversation share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharePayload {
    pub v: u8,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub conversation: Conversation,
}

impl SharePayload {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            v: 1,
            created_at: Utc::now(),
            conversation,
        }
    }

    pub fn to_bytes(&self) -> SmResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SmResult<Self> {
        let payload: Self = serde_json::from_slice(bytes)
            .map_err(|e| SmError::InvalidToken(format!("share payload: {e}")))?;
        if payload.v != 1 {
            return Err(SmError::InvalidToken(format!(
                "unsupported share payload version: {}",
                payload.v
            )));
        }
        Ok(payload)
    }
}

/// Ledger row recording a redeemed share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConversationImport {
    pub share_id: String,
    pub conversation_id: String,
    pub imported_at: DateTime<Utc>,
    pub source_wallet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::conversation::{Client, Message};

    fn sample_conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "c-1".into(),
            client: Client::ClaudeCode,
            project: "demo".into(),
            started_at: now,
            updated_at: now,
            messages: vec![Message::text("user", "hello")],
        }
    }

    #[test]
    fn token_url_round_trip() {
        let key = [7u8; SHARE_KEY_LEN];
        let token = ShareToken::new("sid-1", &key, Some("tx-1".into()));
        let url = token.to_url().unwrap();
        assert!(url.starts_with(SHARE_URL_PREFIX));

        let parsed = ShareToken::parse_url(&url).unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.key_bytes().unwrap(), key);
    }

    #[test]
    fn token_from_query_parameter() {
        let token = ShareToken::new("sid-2", &[1u8; SHARE_KEY_LEN], None);
        let encoded = token.encode().unwrap();
        let url = format!("{SHARE_URL_PREFIX}?token={encoded}");
        assert_eq!(ShareToken::parse_url(&url).unwrap(), token);
    }

    #[test]
    fn bare_token_accepted() {
        let token = ShareToken::new("sid-3", &[9u8; SHARE_KEY_LEN], None);
        let encoded = token.encode().unwrap();
        assert_eq!(ShareToken::parse_url(&encoded).unwrap(), token);
    }

    #[test]
    fn short_key_rejected() {
        let json = serde_json::json!({"v": 1, "sid": "s", "k": BASE64URL.encode([0u8; 16])});
        let encoded = BASE64URL.encode(serde_json::to_vec(&json).unwrap());
        assert!(matches!(
            ShareToken::decode(&encoded),
            Err(SmError::InvalidToken(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let json = serde_json::json!({"v": 2, "sid": "s", "k": BASE64URL.encode([0u8; 32])});
        let encoded = BASE64URL.encode(serde_json::to_vec(&json).unwrap());
        assert!(ShareToken::decode(&encoded).is_err());
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(ShareToken::parse_url("sharme://share/%%%").is_err());
        assert!(ShareToken::parse_url("").is_err());
    }

    #[test]
    fn payload_round_trip_and_version_check() {
        let payload = SharePayload::new(sample_conversation());
        let bytes = payload.to_bytes().unwrap();
        let back = SharePayload::from_bytes(&bytes).unwrap();
        assert_eq!(back.conversation.id, "c-1");

        let mut bad = serde_json::from_slice::<serde_json::Value>(&bytes).unwrap();
        bad["v"] = serde_json::json!(9);
        assert!(SharePayload::from_bytes(&serde_json::to_vec(&bad).unwrap()).is_err());
    }
}
