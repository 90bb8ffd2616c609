//! Key material for collections and users.
//!
//! - [`CollectionKey`]: AES-256-GCM key protecting a collection's in-flight content.
//! - [`SealedIdentity`]: a user's X25519 key pair, the private half sealed by a
//!   PBKDF2 password-derived key.
//! - [`SealedKey`]: a collection key sealed to one user's public key
//!   (ephemeral X25519 agreement, HKDF-SHA256, AES-256-GCM). Anyone can seal
//!   a key for a user; only the unlocked identity can open it.
//!
//! Ciphertexts are laid out as `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use std::fmt;
use std::num::NonZeroU32;

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, hkdf, pbkdf2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const SHARE_CONTEXT: &[u8] = b"content-release keyring share v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Seal,
    #[error("Decryption failed")]
    Open,
    #[error("Random number generation failed")]
    Random,
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| CryptoError::Random)?;
    Ok(bytes)
}

fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| CryptoError::InvalidKey("bad AES-256-GCM key".to_string()))?;
    let key = LessSafeKey::new(unbound);
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| CryptoError::Seal)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(sealed)
}

fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(CryptoError::Open);
    }
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| CryptoError::InvalidKey("bad AES-256-GCM key".to_string()))?;
    let key = LessSafeKey::new(unbound);

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Open)?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Open)?;
    Ok(plaintext.to_vec())
}

/// SHA-256 of `data`, used to verify published content.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
    out
}

/// URL-safe random token (256 bits).
pub fn random_token() -> Result<String, CryptoError> {
    let bytes = random_bytes::<32>()?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

// ============================================================================
// Collection keys
// ============================================================================

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionKey([u8; KEY_SIZE]);

impl fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CollectionKey(..)")
    }
}

impl From<[u8; KEY_SIZE]> for CollectionKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        CollectionKey(bytes)
    }
}

impl CollectionKey {
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(CollectionKey(random_bytes::<KEY_SIZE>()?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.0, plaintext)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.0, sealed)
    }
}

// ============================================================================
// User identities
// ============================================================================

fn password_key(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; KEY_SIZE], CryptoError> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| CryptoError::InvalidKey("iteration count must be non-zero".to_string()))?;
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key,
    );
    Ok(key)
}

/// A user's key pair as persisted: public key in clear, private key sealed by
/// the password-derived key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedIdentity {
    pub public_key: [u8; KEY_SIZE],
    pub salt: [u8; SALT_SIZE],
    pub iterations: u32,
    pub sealed_secret: Vec<u8>,
}

impl SealedIdentity {
    pub fn generate(password: &str, iterations: u32) -> Result<Self, CryptoError> {
        let secret = StaticSecret::from(random_bytes::<KEY_SIZE>()?);
        let public_key = PublicKey::from(&secret).to_bytes();
        let salt = random_bytes::<SALT_SIZE>()?;
        let wrapping = password_key(password, &salt, iterations)?;
        let sealed_secret = seal(&wrapping, &secret.to_bytes())?;

        Ok(Self {
            public_key,
            salt,
            iterations,
            sealed_secret,
        })
    }

    /// Open the private key. A wrong password surfaces as [`CryptoError::Open`].
    pub fn unlock(&self, password: &str) -> Result<UnlockedIdentity, CryptoError> {
        let wrapping = password_key(password, &self.salt, self.iterations)?;
        let secret = open(&wrapping, &self.sealed_secret)?;
        let secret: [u8; KEY_SIZE] = secret
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("sealed secret has wrong size".to_string()))?;
        Ok(UnlockedIdentity {
            secret: StaticSecret::from(secret),
        })
    }

    /// Seal a collection key so only this identity can open it.
    pub fn seal_key(&self, key: &CollectionKey) -> Result<SealedKey, CryptoError> {
        let ephemeral = StaticSecret::from(random_bytes::<KEY_SIZE>()?);
        let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
        let shared = ephemeral.diffie_hellman(&PublicKey::from(self.public_key));
        let wrapping = share_key(shared.as_bytes(), &ephemeral_public, &self.public_key)?;

        Ok(SealedKey {
            ephemeral_public,
            ciphertext: seal(&wrapping, key.as_bytes())?,
        })
    }
}

pub struct UnlockedIdentity {
    secret: StaticSecret,
}

impl fmt::Debug for UnlockedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockedIdentity(..)")
    }
}

impl UnlockedIdentity {
    pub fn open_key(&self, sealed: &SealedKey) -> Result<CollectionKey, CryptoError> {
        let recipient = PublicKey::from(&self.secret).to_bytes();
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(sealed.ephemeral_public));
        let wrapping = share_key(shared.as_bytes(), &sealed.ephemeral_public, &recipient)?;
        let key = open(&wrapping, &sealed.ciphertext)?;
        let key: [u8; KEY_SIZE] = key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("sealed key has wrong size".to_string()))?;
        Ok(CollectionKey(key))
    }
}

/// A collection key sealed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    pub ephemeral_public: [u8; KEY_SIZE],
    pub ciphertext: Vec<u8>,
}

fn share_key(
    shared: &[u8],
    ephemeral_public: &[u8; KEY_SIZE],
    recipient: &[u8; KEY_SIZE],
) -> Result<[u8; KEY_SIZE], CryptoError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, ephemeral_public);
    let prk = salt.extract(shared);
    let info = [SHARE_CONTEXT, recipient.as_slice()];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| CryptoError::InvalidKey("HKDF expansion failed".to_string()))?;
    let mut key = [0u8; KEY_SIZE];
    okm.fill(&mut key)
        .map_err(|_| CryptoError::InvalidKey("HKDF expansion failed".to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: u32 = 1_000;

    #[test]
    fn collection_key_roundtrip() {
        let key = CollectionKey::generate().unwrap();
        let sealed = key.encrypt(b"embargoed figures").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"embargoed figures");
        assert_eq!(key.decrypt(&sealed).unwrap(), b"embargoed figures");
    }

    #[test]
    fn collection_key_rejects_other_key_and_tampering() {
        let key = CollectionKey::generate().unwrap();
        let other = CollectionKey::generate().unwrap();
        let mut sealed = key.encrypt(b"content").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Open)));

        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(key.decrypt(&sealed), Err(CryptoError::Open)));
        assert!(matches!(key.decrypt(&[0u8; 4]), Err(CryptoError::Open)));
    }

    #[test]
    fn identity_unlock_requires_password() {
        let identity = SealedIdentity::generate("correct horse", FAST).unwrap();
        assert!(identity.unlock("correct horse").is_ok());
        assert!(matches!(identity.unlock("wrong"), Err(CryptoError::Open)));
    }

    #[test]
    fn sealed_key_opens_only_for_recipient() {
        let alice = SealedIdentity::generate("alice-pw", FAST).unwrap();
        let bob = SealedIdentity::generate("bob-pw", FAST).unwrap();
        let key = CollectionKey::generate().unwrap();

        let share = alice.seal_key(&key).unwrap();
        let opened = alice.unlock("alice-pw").unwrap().open_key(&share).unwrap();
        assert_eq!(opened, key);

        let bob_unlocked = bob.unlock("bob-pw").unwrap();
        assert!(bob_unlocked.open_key(&share).is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            SealedIdentity::generate("pw", 0),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn tokens_are_unique() {
        let a = random_token().unwrap();
        let b = random_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }
}
