//! Share channel: one-shot encrypted conversation payloads redeemed through
//! an out-of-band token.

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

use sm_core::{
    tags, ArchiveIndex, Conversation, SharePayload, ShareToken, SharedConversationImport,
    SmError, SmResult, Tag, UploadBackend, SHARE_DOWNLOAD_CAP, SHARE_KEY_LEN,
};
use sm_storage::crypto;
use sm_storage::{FactStore, Keypair};

pub struct ShareChannel {
    store: Arc<FactStore>,
    archive: Arc<dyn ArchiveIndex>,
    uploader: Arc<dyn UploadBackend>,
    keypair: Keypair,
}

#[derive(Debug, Clone)]
pub struct IssuedShare {
    pub share_id: String,
    pub tx_id: String,
    pub token: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Imported(Box<Conversation>),
    /// The share id was already in the import ledger; redemption is a no-op.
    AlreadyImported(String),
}

impl ShareChannel {
    pub fn new(
        store: Arc<FactStore>,
        archive: Arc<dyn ArchiveIndex>,
        uploader: Arc<dyn UploadBackend>,
        keypair: Keypair,
    ) -> Self {
        Self {
            store,
            archive,
            uploader,
            keypair,
        }
    }

    // -----------------------------------------------------------------------
    // Issue
    // -----------------------------------------------------------------------

    /// Encrypt a conversation under a fresh one-shot key, upload it as a
    /// `conversation-share` transaction, and emit the redemption token.
    pub async fn issue(&self, conversation: &Conversation) -> SmResult<IssuedShare> {
        let share_id = uuid::Uuid::new_v4().to_string();
        let mut share_key = [0u8; SHARE_KEY_LEN];
        OsRng.fill_bytes(&mut share_key);

        let payload = SharePayload::new(conversation.clone()).to_bytes()?;
        let envelope = crypto::encrypt(&payload, &share_key)?;
        let signature = crypto::sign(&envelope, &self.keypair.private_key)?;

        let upload_tags = vec![
            Tag::new(tags::TAG_APP_NAME, tags::APP_NAME),
            Tag::new(tags::TAG_TYPE, tags::TYPE_CONVERSATION_SHARE),
            Tag::new(tags::TAG_SHARE_ID, &share_id),
            Tag::new(tags::TAG_WALLET, &self.keypair.address),
            Tag::new(tags::TAG_TIMESTAMP, Utc::now().timestamp().to_string()),
            Tag::new(tags::TAG_SIGNATURE, signature),
            Tag::new(tags::TAG_CONTENT_TYPE, tags::CONTENT_TYPE_OCTET_STREAM),
        ];
        let tx_id = self.uploader.upload(&envelope, &upload_tags).await?;

        let token = ShareToken::new(&share_id, &share_key, Some(tx_id.clone()));
        let issued = IssuedShare {
            share_id: share_id.clone(),
            tx_id,
            token: token.encode()?,
            url: token.to_url()?,
        };

        tracing::info!(share_id = %share_id, session = %conversation.id, "issued share");
        Ok(issued)
    }

    // -----------------------------------------------------------------------
    // Redeem
    // -----------------------------------------------------------------------

    /// Redeem a share URL or bare token. Single-object critical path: every
    /// failure is loud. A second redemption of the same share id is a no-op.
    pub async fn redeem(&self, input: &str) -> SmResult<RedeemOutcome> {
        let token = ShareToken::parse_url(input)?;
        let share_key = token.key_bytes()?;

        if self.store.has_shared_conversation_import(&token.sid)? {
            return Ok(RedeemOutcome::AlreadyImported(token.sid));
        }

        let (envelope, source_wallet) = self.resolve_payload(&token).await?;

        let plaintext = crypto::decrypt(&envelope, &share_key)?;
        let payload = SharePayload::from_bytes(&plaintext)?;

        let entry = SharedConversationImport {
            share_id: token.sid.clone(),
            conversation_id: payload.conversation.id.clone(),
            imported_at: Utc::now(),
            source_wallet,
        };
        self.store.save_shared_conversation_import(&entry)?;

        tracing::info!(share_id = %token.sid, session = %payload.conversation.id, "redeemed share");
        Ok(RedeemOutcome::Imported(Box::new(payload.conversation)))
    }

    /// Resolve the encrypted payload: direct transaction download when the
    /// token carries `t` (the encryption key alone proves authorization),
    /// falling back to a `Share-Id` query whose signature — when present —
    /// is verified before decryption.
    async fn resolve_payload(&self, token: &ShareToken) -> SmResult<(Vec<u8>, Option<String>)> {
        if let Some(tx_id) = &token.t {
            match self.archive.download(tx_id, SHARE_DOWNLOAD_CAP).await {
                Ok(bytes) => return Ok((bytes, None)),
                Err(e) => {
                    tracing::warn!(tx = %tx_id, error = %e, "direct share download failed, querying by id");
                }
            }
        }

        let share_ref = self
            .archive
            .query_share(&token.sid)
            .await?
            .ok_or_else(|| SmError::InvalidToken(format!("share not found: {}", token.sid)))?;

        let envelope = self
            .archive
            .download(&share_ref.tx_id, SHARE_DOWNLOAD_CAP)
            .await?;

        if let (Some(signature), Some(wallet)) = (&share_ref.signature, &share_ref.wallet) {
            if !crypto::verify(&envelope, signature, wallet) {
                return Err(SmError::SignatureInvalid(share_ref.tx_id));
            }
        }

        Ok((envelope, share_ref.wallet))
    }
}
