//! Encryption of the index artifact
//!
//! The engine only sees the [`IndexCipher`] trait. The default
//! [`XChaChaCipher`] frames every ciphertext as:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────┬──────────────────────┐
//! │ magic "PVDB" │ version: u8 │ nonce: [24]  │ ciphertext + tag     │
//! └──────────────┴─────────────┴──────────────┴──────────────────────┘
//! ```

use crate::storage::error::{StorageError, StorageResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

const CIPHER_MAGIC: [u8; 4] = *b"PVDB";
const CIPHER_VERSION: u8 = 1;
const NONCE_LEN: usize = 24;
const FRAME_HEADER_LEN: usize = CIPHER_MAGIC.len() + 1 + NONCE_LEN;

/// Encrypts and decrypts the serialized index snapshot
pub trait IndexCipher: Send + Sync {
    /// Encrypt a plaintext snapshot
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>>;

    /// Decrypt a stored artifact
    ///
    /// Wrong keys, foreign files and tampered bytes all yield `None`.
    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// 256-bit key material, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SecretKey([u8; 32]);

/// XChaCha20-Poly1305 cipher keyed from a passphrase
#[derive(Clone)]
pub struct XChaChaCipher {
    key: SecretKey,
}

impl XChaChaCipher {
    /// Use raw 32-byte key material
    pub fn from_key(key: [u8; 32]) -> Self {
        Self {
            key: SecretKey(key),
        }
    }

    /// Derive the key as SHA-256 of the passphrase
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        let cipher = Self::from_key(key);
        key.zeroize();
        cipher
    }

    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.key.0).into())
    }
}

impl std::fmt::Debug for XChaChaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaChaCipher").finish_non_exhaustive()
    }
}

impl IndexCipher for XChaChaCipher {
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .aead()
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&CIPHER_MAGIC);
        out.push(CIPHER_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        if ciphertext.len() < FRAME_HEADER_LEN || ciphertext[..4] != CIPHER_MAGIC {
            return None;
        }
        if ciphertext[4] != CIPHER_VERSION {
            tracing::warn!("Unsupported index cipher version: {}", ciphertext[4]);
            return None;
        }

        let nonce = XNonce::from_slice(&ciphertext[5..FRAME_HEADER_LEN]);
        self.aead()
            .decrypt(nonce, &ciphertext[FRAME_HEADER_LEN..])
            .ok()
    }
}
