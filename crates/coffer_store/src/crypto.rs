//! Cryptor interface and AES-256-GCM implementation.
//!
//! The sync engine treats encryption as a collaborator: it only needs
//! [`Cryptor::encrypt`] and [`Cryptor::decrypt`], and treats a
//! [`StoreError::CipherVerification`] as corruption or tampering, fatal to
//! that read or write and never retried.

use crate::error::{StoreError, StoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Ciphertext overhead per sealed message: nonce plus tag.
pub const CIPHER_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts and decrypts version content.
///
/// Implementations must be authenticated: `decrypt` fails with
/// `CipherVerification` on any tampering.
pub trait Cryptor: Send + Sync {
    /// Encrypts plaintext, returning a self-contained ciphertext.
    fn encrypt(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>>;

    /// Decrypts a ciphertext produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, ciphertext: &[u8]) -> StoreResult<Vec<u8>>;
}

/// Encryption key for AES-256-GCM.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StoreError::InvalidKeySize { expected: KEY_SIZE, actual: bytes.len() });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Do not log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// The salt should be random, unique per account, and stored alongside
    /// the data. HKDF assumes high-entropy input material; sign-in key
    /// stretching happens upstream of this engine.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StoreResult<Self> {
        use hkdf::Hkdf;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"coffer-object-key-v1", &mut bytes)
            .map_err(|_| StoreError::encryption("HKDF expand failed"))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM cryptor.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// Each message gets a fresh random nonce.
pub struct AesGcmCryptor {
    cipher: Aes256Gcm,
}

impl AesGcmCryptor {
    /// Creates a cryptor with the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self { cipher: Aes256Gcm::new(key_array) }
    }
}

impl Cryptor for AesGcmCryptor {
    fn encrypt(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StoreError::encryption("AES-GCM encryption error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> StoreResult<Vec<u8>> {
        if ciphertext.len() < CIPHER_OVERHEAD {
            return Err(StoreError::cipher_verification("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, sealed)
            .map_err(|_| StoreError::cipher_verification("authentication failed"))
    }
}

/// SHA-256 content hash, used for cheap equality checks between versions.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = EncryptionKey::generate();
        let cryptor = AesGcmCryptor::new(&key);

        let plaintext = b"the quick brown fox";
        let sealed = cryptor.encrypt(plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + CIPHER_OVERHEAD);
        assert_eq!(cryptor.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let key = EncryptionKey::generate();
        let cryptor = AesGcmCryptor::new(&key);

        let mut sealed = cryptor.encrypt(b"secret").unwrap();
        sealed[NONCE_SIZE + 1] ^= 0xFF;

        let err = cryptor.decrypt(&sealed).unwrap_err();
        assert!(err.is_cipher_verification());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let sealed = AesGcmCryptor::new(&EncryptionKey::generate())
            .encrypt(b"secret")
            .unwrap();
        let err = AesGcmCryptor::new(&EncryptionKey::generate())
            .decrypt(&sealed)
            .unwrap_err();
        assert!(err.is_cipher_verification());
    }

    #[test]
    fn key_size_validation() {
        assert!(EncryptionKey::from_bytes(&[0u8; 31]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let a = EncryptionKey::derive_from_passphrase(b"hunter2", b"salt").unwrap();
        let b = EncryptionKey::derive_from_passphrase(b"hunter2", b"salt").unwrap();
        let c = EncryptionKey::derive_from_passphrase(b"hunter2", b"pepper").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn content_hash_distinguishes() {
        assert_eq!(content_hash(b"a"), content_hash(b"a"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}
