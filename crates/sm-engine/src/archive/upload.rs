//! Signed upload of tagged payloads through a bundler endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use zeroize::Zeroizing;

use sm_core::{Tag, UploadBackend, SmError, SmResult};
use sm_storage::crypto;
use sm_storage::Keypair;

/// Uploads bytes plus tags to the archive through a bundler node, signing
/// each payload with the identity private key. Errors are retryable; the
/// sync engine re-attempts the whole batch on the next tick.
pub struct BundlerUploadBackend {
    endpoint: String,
    client: reqwest::Client,
    private_key: Zeroizing<[u8; crypto::KEY_SIZE]>,
    address: String,
}

impl BundlerUploadBackend {
    pub fn new(endpoint: impl Into<String>, keypair: &Keypair, timeout: Duration) -> SmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmError::Upload(format!("http client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
            private_key: keypair.private_key.clone(),
            address: keypair.address.clone(),
        })
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    id: String,
}

#[async_trait]
impl UploadBackend for BundlerUploadBackend {
    async fn upload(&self, data: &[u8], tags: &[Tag]) -> SmResult<String> {
        let signature = crypto::sign(data, &self.private_key)?;
        let body = serde_json::json!({
            "data": BASE64.encode(data),
            "tags": tags,
            "address": self.address,
            "signature": signature,
        });

        let response = self
            .client
            .post(format!("{}/tx", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| SmError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SmError::Upload(format!("status {status}: {detail}")));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| SmError::Upload(format!("bundler response: {e}")))?;
        if parsed.id.is_empty() {
            return Err(SmError::Upload("bundler returned empty tx id".into()));
        }

        tracing::debug!(tx = %parsed.id, bytes = data.len(), "uploaded payload");
        Ok(parsed.id)
    }
}
