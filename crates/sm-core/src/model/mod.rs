pub mod archive;
pub use archive::*;
pub mod conversation;
pub use conversation::*;
pub mod fact;
pub use fact::*;
pub mod shard;
pub use shard::*;
pub mod share;
pub use share::*;

// ---------------------------------------------------------------------------
// Meta keys
// ---------------------------------------------------------------------------

/// Reserved keys in the persistent meta KV.
pub mod meta {
    /// Highest shard version this device has confirmed (pushed or replayed).
    pub const CURRENT_VERSION: &str = "current_version";
    /// Highest shard version this device has uploaded.
    pub const LAST_PUSHED_VERSION: &str = "last_pushed_version";
    /// RFC 3339 timestamp of store creation.
    pub const CREATED: &str = "created";
    /// Canonical wallet address for this store.
    pub const WALLET_ADDRESS: &str = "wallet_address";

    /// Cursor key for a conversation session: how many messages have been
    /// uploaded so far.
    pub fn conversation_offset(client: &str, session: &str) -> String {
        format!("conversation_offset:{client}:{session}")
    }
}
