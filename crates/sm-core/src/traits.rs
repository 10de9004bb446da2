use async_trait::async_trait;

use crate::error::SmResult;
use crate::model::{Conversation, ConversationChunkRef, ShardRef, ShareRef};
use crate::tags::Tag;

/// Pluggable signed-upload capability. Implementations sign the payload with
/// the identity key through their native bundling and submit it to the
/// archive, returning the transaction id. Errors are retryable by callers.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn upload(&self, data: &[u8], tags: &[Tag]) -> SmResult<String>;
}

/// Read-only view of the archive's tagged-transaction index and data plane.
/// Implementations apply the strict acceptance rules from `model::archive`
/// before returning references.
#[async_trait]
pub trait ArchiveIndex: Send + Sync {
    /// All accepted shard transactions for a wallet, in canonical replay
    /// order (version ascending).
    async fn query_shards(&self, wallet: &str) -> SmResult<Vec<ShardRef>>;

    /// All accepted conversation chunks for a wallet, sorted by
    /// `(session, offset, chunkIndex, timestamp)`.
    async fn query_conversation_chunks(&self, wallet: &str)
        -> SmResult<Vec<ConversationChunkRef>>;

    /// Newest `conversation-share` transaction for a share id, if any.
    async fn query_share(&self, share_id: &str) -> SmResult<Option<ShareRef>>;

    /// Download transaction data, enforcing `max_bytes` before and while
    /// reading the body.
    async fn download(&self, tx_id: &str, max_bytes: usize) -> SmResult<Vec<u8>>;
}

/// External collaborator that surfaces normalized conversations on change.
/// Transcript discovery and parsing live behind this boundary.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn poll(&self) -> SmResult<Vec<Conversation>>;
}
