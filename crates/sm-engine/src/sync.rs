//! Fact sync: push dirty state as encrypted shards, pull and replay the
//! remote log, and fetch/publish the wallet identity record.
//!
//! Pushes are transactional against local meta: any upload failure aborts
//! the batch without clearing dirty flags, so the next tick retries the
//! whole op set. Pull treats every downloaded byte as untrusted and skips
//! offending shards instead of aborting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use sm_core::{
    create_chunked_shards, meta, tags, ArchiveIndex, Fact, Shard, ShardKind, ShardOp,
    ShardRef, SmError, SmResult, Tag, UploadBackend, IDENTITY_DOWNLOAD_CAP, SHARD_DOWNLOAD_CAP,
};
use sm_storage::crypto;
use sm_storage::{FactStore, Keypair};

pub struct SyncEngine {
    store: Arc<FactStore>,
    archive: Arc<dyn ArchiveIndex>,
    uploader: Arc<dyn UploadBackend>,
    keypair: Keypair,
    aes_key: Zeroizing<[u8; crypto::KEY_SIZE]>,
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub shards: usize,
    pub operations: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub applied: usize,
    pub skipped: usize,
    pub facts: usize,
    pub version: u64,
}

impl SyncEngine {
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

    pub fn wallet_address(&self) -> &str {
        &self.keypair.address
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Drain dirty facts and pending deletes into chunked delta shards and
    /// upload them in ascending version order. Meta advances only after
    /// every shard is confirmed.
    pub async fn push(&self) -> SmResult<PushReport> {
        let (dirty, deletes) = self.store.dirty_snapshot()?;
        let current = self.store.get_meta_u64(meta::CURRENT_VERSION)?;

        if dirty.is_empty() && deletes.is_empty() {
            return Ok(PushReport {
                version: current,
                ..Default::default()
            });
        }

        let mut operations: Vec<ShardOp> =
            dirty.into_iter().map(ShardOp::upsert).collect();
        operations.extend(deletes.into_iter().map(|d| ShardOp::delete(d.key)));
        let op_count = operations.len();

        let start_version = current + 1;
        let seed = uuid::Uuid::new_v4().to_string();
        let shards = create_chunked_shards(operations, start_version, &seed)?;
        let last_version = shards.last().map(|s| s.shard_version).unwrap_or(current);

        for shard in &shards {
            self.upload_shard(shard).await?;
        }

        self.store.clear_dirty_state(last_version)?;
        tracing::info!(
            shards = shards.len(),
            operations = op_count,
            version = last_version,
            "pushed dirty state"
        );

        Ok(PushReport {
            shards: shards.len(),
            operations: op_count,
            version: last_version,
        })
    }

    async fn upload_shard(&self, shard: &Shard) -> SmResult<String> {
        let plaintext = shard.to_bytes()?;
        let envelope = crypto::encrypt(&plaintext, &self.aes_key)?;
        let signature = crypto::sign(&envelope, &self.keypair.private_key)?;

        let upload_tags = vec![
            Tag::new(tags::TAG_APP_NAME, tags::APP_NAME),
            Tag::new(tags::TAG_WALLET, &self.keypair.address),
            Tag::new(tags::TAG_TYPE, shard.kind.as_str()),
            Tag::new(tags::TAG_VERSION, shard.shard_version.to_string()),
            Tag::new(tags::TAG_TIMESTAMP, Utc::now().timestamp().to_string()),
            Tag::new(tags::TAG_SIGNATURE, signature),
            Tag::new(tags::TAG_CONTENT_TYPE, tags::CONTENT_TYPE_OCTET_STREAM),
        ];

        self.uploader.upload(&envelope, &upload_tags).await
    }

    // -----------------------------------------------------------------------
    // Pull + replay
    // -----------------------------------------------------------------------

    /// Reconstruct state from the remote log: download accepted shards in
    /// version order, verify/decrypt/parse each, and replay ops. A shard
    /// that fails any check is skipped; one bad shard cannot deny service.
    pub async fn pull(&self) -> SmResult<PullReport> {
        let refs = self.archive.query_shards(&self.keypair.address).await?;
        let refs: Vec<ShardRef> = refs
            .into_iter()
            .filter(|r| matches!(r.kind, ShardKind::Delta | ShardKind::Snapshot))
            .collect();

        if refs.is_empty() {
            return Ok(PullReport::default());
        }

        // Replay starts at the newest snapshot, when one exists.
        let snapshot_version = refs
            .iter()
            .filter(|r| r.kind == ShardKind::Snapshot)
            .map(|r| r.version)
            .max();
        let start = snapshot_version.unwrap_or(1);

        let mut report = PullReport::default();
        let mut state: BTreeMap<String, Fact> = BTreeMap::new();
        let mut deleted: BTreeSet<String> = BTreeSet::new();
        let mut max_applied: Option<u64> = None;

        for shard_ref in refs.iter().filter(|r| r.version >= start) {
            match self.replay_shard(shard_ref, &mut state, &mut deleted).await {
                Ok(()) => {
                    report.applied += 1;
                    max_applied = Some(max_applied.map_or(shard_ref.version, |v| {
                        v.max(shard_ref.version)
                    }));
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(
                        tx = %shard_ref.tx_id,
                        version = shard_ref.version,
                        error = %e,
                        "skipping shard"
                    );
                }
            }
        }

        if let Some(version) = max_applied {
            let facts: Vec<Fact> = state.into_values().collect();
            let deleted: Vec<String> = deleted.into_iter().collect();
            report.facts = facts.len();
            report.version = version;
            self.store.apply_remote_state(&facts, &deleted, version)?;
            tracing::info!(
                applied = report.applied,
                skipped = report.skipped,
                facts = report.facts,
                version = version,
                "replayed remote log"
            );
        }

        Ok(report)
    }

    async fn replay_shard(
        &self,
        shard_ref: &ShardRef,
        state: &mut BTreeMap<String, Fact>,
        deleted: &mut BTreeSet<String>,
    ) -> SmResult<()> {
        let envelope = self
            .archive
            .download(&shard_ref.tx_id, SHARD_DOWNLOAD_CAP)
            .await?;

        if !crypto::verify(&envelope, &shard_ref.signature, &shard_ref.wallet) {
            return Err(SmError::SignatureInvalid(shard_ref.tx_id.clone()));
        }

        let plaintext = crypto::decrypt(&envelope, &self.aes_key)?;
        let shard = Shard::from_bytes(&plaintext)?;

        for op in shard.operations {
            match op {
                ShardOp::Upsert { fact } => {
                    deleted.remove(&fact.key);
                    state.insert(fact.key.clone(), fact);
                }
                ShardOp::Delete { key } => {
                    state.remove(&key);
                    deleted.insert(key);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity record
// ---------------------------------------------------------------------------

/// Identity record fetched from the archive.
pub struct RemoteIdentity {
    pub salt: Vec<u8>,
    pub encrypted_private_key: Vec<u8>,
}

/// Fetch the newest identity record for a wallet. Single-object critical
/// path: every failure is loud. Returns `Ok(None)` when no identity exists
/// or when a legacy record carries no `Salt` tag — the salt is never
/// guessed.
pub async fn fetch_identity(
    archive: &dyn ArchiveIndex,
    address: &str,
) -> SmResult<Option<RemoteIdentity>> {
    let refs = archive.query_shards(address).await?;
    let newest = refs
        .into_iter()
        .filter(|r| r.kind == ShardKind::Identity)
        .max_by(|a, b| {
            (a.block_height, &a.tx_id)
                .cmp(&(b.block_height, &b.tx_id))
        });

    let Some(identity) = newest else {
        return Ok(None);
    };
    let Some(salt_hex) = identity.salt else {
        return Ok(None);
    };

    let salt = hex::decode(&salt_hex)
        .map_err(|e| SmError::Crypto(format!("identity salt: {e}")))?;
    let encrypted_private_key = archive
        .download(&identity.tx_id, IDENTITY_DOWNLOAD_CAP)
        .await?;

    if !crypto::verify(&encrypted_private_key, &identity.signature, address) {
        return Err(SmError::SignatureInvalid(identity.tx_id));
    }

    Ok(Some(RemoteIdentity {
        salt,
        encrypted_private_key,
    }))
}

/// Publish the identity record: the phrase-encrypted private key, tagged
/// with the salt so any device holding the phrase can reconstruct the AES
/// key. Returns the transaction id.
pub async fn publish_identity(
    uploader: &dyn UploadBackend,
    keypair: &Keypair,
    salt: &[u8],
    identity_envelope: &[u8],
) -> SmResult<String> {
    let signature = crypto::sign(identity_envelope, &keypair.private_key)?;
    let upload_tags = vec![
        Tag::new(tags::TAG_APP_NAME, tags::APP_NAME),
        Tag::new(tags::TAG_WALLET, &keypair.address),
        Tag::new(tags::TAG_TYPE, tags::TYPE_IDENTITY),
        Tag::new(tags::TAG_SALT, hex::encode(salt)),
        Tag::new(tags::TAG_TIMESTAMP, Utc::now().timestamp().to_string()),
        Tag::new(tags::TAG_SIGNATURE, signature),
        Tag::new(tags::TAG_CONTENT_TYPE, tags::CONTENT_TYPE_OCTET_STREAM),
    ];
    uploader.upload(identity_envelope, &upload_tags).await
}
