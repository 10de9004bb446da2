//! Archive tag schema. Tag names are bit-exact and case-sensitive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Constant `App-Name` value for every sharme transaction.
pub const APP_NAME: &str = "sharme";

pub const TAG_APP_NAME: &str = "App-Name";
pub const TAG_WALLET: &str = "Wallet";
pub const TAG_TYPE: &str = "Type";
pub const TAG_VERSION: &str = "Version";
pub const TAG_SALT: &str = "Salt";
pub const TAG_CLIENT: &str = "Client";
pub const TAG_PROJECT: &str = "Project";
pub const TAG_SESSION: &str = "Session";
pub const TAG_OFFSET: &str = "Offset";
pub const TAG_COUNT: &str = "Count";
pub const TAG_CHUNK: &str = "Chunk";
pub const TAG_SHARE_ID: &str = "Share-Id";
pub const TAG_TIMESTAMP: &str = "Timestamp";
pub const TAG_SIGNATURE: &str = "Signature";
pub const TAG_CONTENT_TYPE: &str = "Content-Type";

pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

pub const TYPE_DELTA: &str = "delta";
pub const TYPE_SNAPSHOT: &str = "snapshot";
pub const TYPE_IDENTITY: &str = "identity";
pub const TYPE_CONVERSATION: &str = "conversation";
pub const TYPE_CONVERSATION_SHARE: &str = "conversation-share";

/// One name/value tag attached to an archive transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Collect a tag list into a name → value map. Later duplicates win, which
/// matches gateway behavior of returning tags in write order.
pub fn tag_map(tags: &[Tag]) -> HashMap<String, String> {
    tags.iter()
        .map(|t| (t.name.clone(), t.value.clone()))
        .collect()
}

/// Parse a `Chunk` tag value `i/total` with 1-based `i <= total`.
pub fn parse_chunk_label(value: &str) -> Option<(usize, usize)> {
    let (index, total) = value.split_once('/')?;
    let index: usize = index.parse().ok()?;
    let total: usize = total.parse().ok()?;
    if index >= 1 && total >= 1 && index <= total {
        Some((index, total))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_label_parses_valid_forms() {
        assert_eq!(parse_chunk_label("1/1"), Some((1, 1)));
        assert_eq!(parse_chunk_label("3/7"), Some((3, 7)));
    }

    #[test]
    fn chunk_label_rejects_invalid_forms() {
        assert_eq!(parse_chunk_label("0/1"), None);
        assert_eq!(parse_chunk_label("2/1"), None);
        assert_eq!(parse_chunk_label("1"), None);
        assert_eq!(parse_chunk_label("a/b"), None);
        assert_eq!(parse_chunk_label("1/0"), None);
    }

    #[test]
    fn tag_map_collects_pairs() {
        let tags = vec![Tag::new(TAG_TYPE, TYPE_DELTA), Tag::new(TAG_VERSION, "3")];
        let map = tag_map(&tags);
        assert_eq!(map[TAG_TYPE], "delta");
        assert_eq!(map[TAG_VERSION], "3");
    }
}
