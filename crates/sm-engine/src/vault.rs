//! On-disk vault: `$SHARME_HOME/{db,salt,identity.enc,shards/}`.
//!
//! `salt` is 16 raw bytes; `identity.enc` is the AES-GCM envelope of the
//! identity private key under the phrase-derived key. Opening the vault with
//! the wrong phrase fails at the envelope's authentication tag.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use sm_core::{meta, ArchiveIndex, SmError, SmResult, UploadBackend};
use sm_storage::{crypto, identity, FactStore, Keypair};

use crate::config::EngineConfig;
use crate::sync;

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub home: PathBuf,
    pub db: PathBuf,
    pub salt: PathBuf,
    pub identity: PathBuf,
    pub shards: PathBuf,
}

impl VaultPaths {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            db: home.join("db"),
            salt: home.join("salt"),
            identity: home.join("identity.enc"),
            shards: home.join("shards"),
        }
    }
}

/// An unlocked vault: derived identity plus the phrase-derived AES key.
pub struct Vault {
    pub paths: VaultPaths,
    pub keypair: Keypair,
    pub aes_key: Zeroizing<[u8; crypto::KEY_SIZE]>,
    pub salt: [u8; crypto::SALT_SIZE],
}

impl Vault {
    /// Whether a vault already exists at `home`.
    pub fn exists(home: &Path) -> bool {
        VaultPaths::new(home).salt.exists()
    }

    /// Create a fresh vault with a new random salt.
    pub fn create(home: &Path, phrase: &str) -> SmResult<Self> {
        Self::create_with_salt(home, phrase, crypto::generate_salt())
    }

    /// Create a vault with a known salt (device recovery: the salt comes
    /// from the archived identity record).
    pub fn create_with_salt(
        home: &Path,
        phrase: &str,
        salt: [u8; crypto::SALT_SIZE],
    ) -> SmResult<Self> {
        if Self::exists(home) {
            return Err(SmError::InvalidInput(format!(
                "vault already exists at {}",
                home.display()
            )));
        }

        let paths = VaultPaths::new(home);
        std::fs::create_dir_all(&paths.shards)
            .map_err(|e| SmError::Storage(format!("create vault dirs: {e}")))?;

        let keypair = identity::derive_keypair(phrase)?;
        let normalized = identity::normalize_phrase(phrase);
        let aes_key = crypto::derive_key(&normalized, &salt)?;

        let identity_envelope = crypto::encrypt(keypair.private_key.as_ref(), &aes_key)?;
        std::fs::write(&paths.salt, salt)
            .map_err(|e| SmError::Storage(format!("write salt: {e}")))?;
        std::fs::write(&paths.identity, &identity_envelope)
            .map_err(|e| SmError::Storage(format!("write identity: {e}")))?;

        Ok(Self {
            paths,
            keypair,
            aes_key,
            salt,
        })
    }

    /// Open an existing vault. `NotInitialized` when the home is missing;
    /// `DecryptFailed` when the phrase does not match the stored identity.
    pub fn open(home: &Path, phrase: &str) -> SmResult<Self> {
        let paths = VaultPaths::new(home);
        if !paths.salt.exists() || !paths.identity.exists() {
            return Err(SmError::NotInitialized(format!(
                "no vault at {}",
                home.display()
            )));
        }

        let salt_raw = std::fs::read(&paths.salt)
            .map_err(|e| SmError::Storage(format!("read salt: {e}")))?;
        let salt: [u8; crypto::SALT_SIZE] = salt_raw
            .try_into()
            .map_err(|_| SmError::StoreCorruption("salt file is not 16 bytes".into()))?;

        let normalized = identity::normalize_phrase(phrase);
        let aes_key = crypto::derive_key(&normalized, &salt)?;

        let identity_envelope = std::fs::read(&paths.identity)
            .map_err(|e| SmError::Storage(format!("read identity: {e}")))?;
        let private_raw = crypto::decrypt(&identity_envelope, &aes_key)?;
        let private_key: [u8; crypto::KEY_SIZE] = private_raw
            .try_into()
            .map_err(|_| SmError::StoreCorruption("identity key is not 32 bytes".into()))?;
        let keypair = identity::keypair_from_private(&private_key)?;

        Ok(Self {
            paths,
            keypair,
            aes_key,
            salt,
        })
    }

    /// The stored identity envelope (for publishing to the archive).
    pub fn identity_envelope(&self) -> SmResult<Vec<u8>> {
        std::fs::read(&self.paths.identity)
            .map_err(|e| SmError::Storage(format!("read identity: {e}")))
    }

    /// Open the local store and stamp first-run meta.
    pub fn open_store(&self) -> SmResult<Arc<FactStore>> {
        let store = FactStore::open(&self.paths.db)?;
        if store.get_meta(meta::CREATED)?.is_none() {
            store.set_meta(meta::CREATED, &Utc::now().to_rfc3339())?;
        }
        store.set_meta(meta::WALLET_ADDRESS, &self.keypair.address)?;
        Ok(Arc::new(store))
    }

    /// Remove a partially created vault home. Best-effort.
    pub fn teardown(home: &Path) {
        if let Err(e) = std::fs::remove_dir_all(home) {
            tracing::warn!(home = %home.display(), error = %e, "vault teardown failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Init flows
// ---------------------------------------------------------------------------

/// Initialize a brand-new vault: generate (or accept) a phrase, create the
/// on-disk home, and publish the identity record so the phrase alone can
/// recover this wallet elsewhere. Tears the home down on any failure.
pub async fn init_new(
    config: &EngineConfig,
    uploader: &dyn UploadBackend,
    phrase: Option<String>,
) -> SmResult<(Vault, String)> {
    let phrase = match phrase {
        Some(p) => {
            identity::parse_phrase(&p)?;
            p
        }
        None => identity::generate_phrase()?,
    };

    let vault = Vault::create(&config.home, &phrase)?;
    let envelope = match vault.identity_envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            Vault::teardown(&config.home);
            return Err(e);
        }
    };

    if let Err(e) = sync::publish_identity(uploader, &vault.keypair, &vault.salt, &envelope).await
    {
        Vault::teardown(&config.home);
        return Err(e);
    }

    tracing::info!(wallet = %vault.keypair.address, "initialized new vault");
    Ok((vault, phrase))
}

/// Recover a vault on a new device from the phrase alone: derive the
/// wallet, fetch the identity record for its salt, and rebuild the home.
/// Tears the partially created home down on any failure.
pub async fn init_existing(
    config: &EngineConfig,
    archive: &dyn ArchiveIndex,
    phrase: &str,
) -> SmResult<Vault> {
    if Vault::exists(&config.home) {
        return Err(SmError::InvalidInput(format!(
            "vault already exists at {}",
            config.home.display()
        )));
    }

    let keypair = identity::derive_keypair(phrase)?;

    let remote = sync::fetch_identity(archive, &keypair.address)
        .await?
        .ok_or_else(|| {
            SmError::NotInitialized(format!(
                "no identity record in the archive for {}",
                keypair.address
            ))
        })?;

    let salt: [u8; crypto::SALT_SIZE] = remote
        .salt
        .try_into()
        .map_err(|_| SmError::Crypto("identity salt is not 16 bytes".into()))?;

    let vault = match Vault::create_with_salt(&config.home, phrase, salt) {
        Ok(vault) => vault,
        Err(e) => {
            Vault::teardown(&config.home);
            return Err(e);
        }
    };

    // Cross-check: the archived identity must decrypt to the same key the
    // phrase derives, otherwise the home is torn down.
    match crypto::decrypt(&remote.encrypted_private_key, &vault.aes_key) {
        Ok(private) if private.as_slice() == vault.keypair.private_key.as_ref() => {}
        Ok(_) => {
            Vault::teardown(&config.home);
            return Err(SmError::StoreCorruption(
                "archived identity does not match the recovery phrase".into(),
            ));
        }
        Err(e) => {
            Vault::teardown(&config.home);
            return Err(e);
        }
    }

    tracing::info!(wallet = %vault.keypair.address, "recovered vault from archive");
    Ok(vault)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "legal winner thank year wave sausage worth useful legal winner thank yellow";

    #[test]
    fn create_then_open_round_trips_identity() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");

        let created = Vault::create(&home, PHRASE).unwrap();
        assert!(Vault::exists(&home));
        assert_eq!(std::fs::read(&created.paths.salt).unwrap().len(), 16);

        let opened = Vault::open(&home, PHRASE).unwrap();
        assert_eq!(opened.keypair.address, created.keypair.address);
        assert_eq!(*opened.aes_key, *created.aes_key);
    }

    #[test]
    fn open_with_wrong_phrase_fails_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");
        Vault::create(&home, PHRASE).unwrap();

        let wrong =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        assert!(matches!(
            Vault::open(&home, wrong),
            Err(SmError::DecryptFailed(_))
        ));
    }

    #[test]
    fn open_missing_home_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Vault::open(&dir.path().join("nope"), PHRASE),
            Err(SmError::NotInitialized(_))
        ));
    }

    #[test]
    fn double_create_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");
        Vault::create(&home, PHRASE).unwrap();
        assert!(Vault::create(&home, PHRASE).is_err());
    }

    #[test]
    fn store_opens_with_wallet_meta() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");
        let vault = Vault::create(&home, PHRASE).unwrap();
        let store = vault.open_store().unwrap();
        assert_eq!(
            store.get_meta(meta::WALLET_ADDRESS).unwrap().unwrap(),
            vault.keypair.address
        );
        assert!(store.get_meta(meta::CREATED).unwrap().is_some());
    }
}
