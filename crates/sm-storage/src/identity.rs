//! Identity derivation from the 12-word recovery phrase.
//!
//! The phrase is the sole root secret. Key derivation is a pure function of
//! the normalized phrase text, so any device holding the phrase derives the
//! same wallet.

use aes_gcm::aead::OsRng;
use bip39::{Language, Mnemonic};
use k256::ecdsa::SigningKey;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use sm_core::{SmError, SmResult};

use crate::crypto::{address_from_public_key, KEY_SIZE, PUBLIC_KEY_SIZE};

pub const PHRASE_WORD_COUNT: usize = 12;
const PHRASE_ENTROPY_BYTES: usize = 16;

/// A derived wallet identity.
#[derive(Clone)]
pub struct Keypair {
    pub private_key: Zeroizing<[u8; KEY_SIZE]>,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub address: String,
}

/// Generate a fresh 12-word English phrase from 128 bits of OS entropy.
pub fn generate_phrase() -> SmResult<String> {
    let mut entropy = Zeroizing::new([0u8; PHRASE_ENTROPY_BYTES]);
    OsRng.fill_bytes(entropy.as_mut());
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy.as_ref())
        .map_err(|e| SmError::Crypto(format!("phrase generation: {e}")))?;
    Ok(mnemonic.to_string())
}

/// Normalize phrase text before any derivation: lowercased and single-space
/// joined. The English wordlist is ASCII, so NFKD normalization is the
/// identity transform here.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validate a phrase: exactly 12 known English words with a valid checksum.
pub fn parse_phrase(phrase: &str) -> SmResult<Mnemonic> {
    let normalized = normalize_phrase(phrase);
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| SmError::InvalidPhrase(e.to_string()))?;
    if mnemonic.word_count() != PHRASE_WORD_COUNT {
        return Err(SmError::InvalidPhrase(format!(
            "expected {PHRASE_WORD_COUNT} words, got {}",
            mnemonic.word_count()
        )));
    }
    Ok(mnemonic)
}

/// Derive the wallet keypair from the phrase. Deterministic: the secp256k1
/// scalar comes from the first 32 bytes of the BIP39 seed, re-rolled through
/// SHA-256 in the (negligible-probability) out-of-range case.
pub fn derive_keypair(phrase: &str) -> SmResult<Keypair> {
    let mnemonic = parse_phrase(phrase)?;
    let seed = Zeroizing::new(mnemonic.to_seed(""));

    let mut candidate = Zeroizing::new([0u8; KEY_SIZE]);
    candidate.copy_from_slice(&seed[..KEY_SIZE]);
    let signing_key = loop {
        match SigningKey::from_slice(candidate.as_ref()) {
            Ok(key) => break key,
            Err(_) => {
                let rolled = Sha256::digest(candidate.as_ref());
                candidate.copy_from_slice(rolled.as_slice());
            }
        }
    };

    keypair_from_signing_key(signing_key)
}

/// Rebuild the full keypair from a raw private key, so the push pipeline can
/// tag uploads without re-deriving from the phrase.
pub fn public_key_from_private(private_key: &[u8; KEY_SIZE]) -> SmResult<[u8; PUBLIC_KEY_SIZE]> {
    let signing_key = SigningKey::from_slice(private_key)
        .map_err(|e| SmError::Crypto(format!("private key: {e}")))?;
    let point = signing_key.verifying_key().to_encoded_point(false);
    let mut public = [0u8; PUBLIC_KEY_SIZE];
    public.copy_from_slice(point.as_bytes());
    Ok(public)
}

pub fn keypair_from_private(private_key: &[u8; KEY_SIZE]) -> SmResult<Keypair> {
    let signing_key = SigningKey::from_slice(private_key)
        .map_err(|e| SmError::Crypto(format!("private key: {e}")))?;
    keypair_from_signing_key(signing_key)
}

fn keypair_from_signing_key(signing_key: SigningKey) -> SmResult<Keypair> {
    let point = signing_key.verifying_key().to_encoded_point(false);
    let mut public_key = [0u8; PUBLIC_KEY_SIZE];
    public_key.copy_from_slice(point.as_bytes());
    let address = address_from_public_key(&public_key)?;

    let mut private_key = Zeroizing::new([0u8; KEY_SIZE]);
    private_key.copy_from_slice(signing_key.to_bytes().as_slice());

    Ok(Keypair {
        private_key,
        public_key,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP39 English test vector (entropy 0x00 * 16).
    const KNOWN_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generated_phrase_is_twelve_valid_words() {
        let phrase = generate_phrase().unwrap();
        assert_eq!(phrase.split_whitespace().count(), PHRASE_WORD_COUNT);
        assert!(parse_phrase(&phrase).is_ok());
    }

    #[test]
    fn normalization_collapses_case_and_spacing() {
        let messy = "  Abandon ABANDON\tabandon abandon abandon abandon\nabandon abandon abandon abandon abandon About ";
        assert_eq!(normalize_phrase(messy), KNOWN_PHRASE);
        assert!(parse_phrase(messy).is_ok());
    }

    #[test]
    fn invalid_phrases_rejected() {
        // Wrong length.
        assert!(matches!(
            parse_phrase("abandon abandon abandon"),
            Err(SmError::InvalidPhrase(_))
        ));
        // Unknown word.
        let unknown =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon zzzz";
        assert!(parse_phrase(unknown).is_err());
        // Broken checksum: all-`abandon` fails the checksum word.
        let bad_checksum =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(parse_phrase(bad_checksum).is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_keypair(KNOWN_PHRASE).unwrap();
        let b = derive_keypair("  abandon ABANDON abandon abandon abandon abandon abandon abandon abandon abandon abandon about").unwrap();
        assert_eq!(*a.private_key, *b.private_key);
        assert_eq!(a.public_key, b.public_key);
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn different_phrases_yield_different_wallets() {
        let a = derive_keypair(KNOWN_PHRASE).unwrap();
        let b = derive_keypair(
            "legal winner thank year wave sausage worth useful legal winner thank yellow",
        )
        .unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn public_key_rebuilds_from_private() {
        let keypair = derive_keypair(KNOWN_PHRASE).unwrap();
        let public = public_key_from_private(&keypair.private_key).unwrap();
        assert_eq!(public, keypair.public_key);

        let rebuilt = keypair_from_private(&keypair.private_key).unwrap();
        assert_eq!(rebuilt.address, keypair.address);
    }

    #[test]
    fn public_key_is_uncompressed_sec1() {
        let keypair = derive_keypair(KNOWN_PHRASE).unwrap();
        assert_eq!(keypair.public_key.len(), PUBLIC_KEY_SIZE);
        assert_eq!(keypair.public_key[0], 0x04);
    }
}
