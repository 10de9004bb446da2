//! Crypto primitives for the sync layer.
//!
//! AES-256-GCM for payload encryption, Argon2id for phrase-derived keys, and
//! recoverable secp256k1 signatures over the SHA-256 of the ciphertext.
//! Envelope format: `nonce(12) ∥ ciphertext ∥ tag(16)`.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use sm_core::{SmError, SmResult};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 16;
/// Uncompressed SEC1 public key: `0x04 ∥ x(32) ∥ y(32)`.
pub const PUBLIC_KEY_SIZE: usize = 65;
/// Compact signature plus recovery byte: `r(32) ∥ s(32) ∥ recid(1)`.
pub const SIGNATURE_SIZE: usize = 65;

// Argon2id parameters are pinned: derive_key must stay deterministic across
// devices and releases for a given (phrase, salt) pair.
const ARGON2_MEMORY_KIB: u32 = 65536;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

// ---------------------------------------------------------------------------
// KDF
// ---------------------------------------------------------------------------

/// Fresh 16-byte salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Argon2id derivation of the 32-byte AES key from the recovery phrase.
pub fn derive_key(phrase: &str, salt: &[u8]) -> SmResult<Zeroizing<[u8; KEY_SIZE]>> {
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(KEY_SIZE),
        )
        .map_err(|e| SmError::Crypto(format!("argon2 params: {e}")))?,
    );

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(phrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| SmError::Crypto(format!("key derivation: {e}")))?;
    Ok(key)
}

// ---------------------------------------------------------------------------
// AEAD
// ---------------------------------------------------------------------------

/// Encrypt with a fresh random nonce. Output is the wire envelope
/// `nonce ∥ ciphertext ∥ tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> SmResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SmError::Crypto(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SmError::Crypto(format!("encrypt: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a wire envelope. Fails on truncated input or a bad tag.
pub fn decrypt(envelope: &[u8], key: &[u8; KEY_SIZE]) -> SmResult<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        return Err(SmError::DecryptFailed(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SmError::DecryptFailed(format!("cipher init: {e}")))?;
    let nonce = Nonce::from_slice(&envelope[..NONCE_SIZE]);

    cipher
        .decrypt(nonce, &envelope[NONCE_SIZE..])
        .map_err(|_| SmError::DecryptFailed("authentication failed".into()))
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Sign the SHA-256 of `data` with a recoverable secp256k1 signature,
/// returned as 65-byte hex (`r ∥ s ∥ recovery_id`).
pub fn sign(data: &[u8], private_key: &[u8; KEY_SIZE]) -> SmResult<String> {
    let signing_key = SigningKey::from_slice(private_key)
        .map_err(|e| SmError::Crypto(format!("signing key: {e}")))?;
    let digest = Sha256::digest(data);
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(digest.as_slice())
        .map_err(|e| SmError::Crypto(format!("sign: {e}")))?;

    let mut raw = signature.to_bytes().as_slice().to_vec();
    raw.push(recovery_id.to_byte());
    Ok(hex::encode(raw))
}

/// Verify a signature by recovering the public key from the digest and
/// comparing its derived address to `wallet_address` (case-insensitive).
pub fn verify(data: &[u8], signature_hex: &str, wallet_address: &str) -> bool {
    let Ok(raw) = hex::decode(signature_hex) else {
        return false;
    };
    if raw.len() != SIGNATURE_SIZE {
        return false;
    }
    let Ok(signature) = Signature::from_slice(&raw[..64]) else {
        return false;
    };
    let Some(recovery_id) = RecoveryId::from_byte(raw[64]) else {
        return false;
    };

    let digest = Sha256::digest(data);
    let Ok(recovered) =
        VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
    else {
        return false;
    };

    let point = recovered.to_encoded_point(false);
    match address_from_public_key(point.as_bytes()) {
        Ok(address) => address.eq_ignore_ascii_case(wallet_address),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Canonical wallet address: base58 of SHA-256 over the uncompressed public
/// key body (the 64 coordinate bytes after the 0x04 prefix).
pub fn address_from_public_key(public_key: &[u8]) -> SmResult<String> {
    if public_key.len() != PUBLIC_KEY_SIZE || public_key[0] != 0x04 {
        return Err(SmError::Crypto(format!(
            "expected uncompressed public key, got {} bytes",
            public_key.len()
        )));
    }
    let digest = Sha256::digest(&public_key[1..]);
    Ok(bs58::encode(digest).into_string())
}
