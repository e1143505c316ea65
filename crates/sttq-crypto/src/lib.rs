use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::Sha256;
use sttq_common::{Result, TaskError};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// KDF/cipher generation pinned by a single byte so future bundle formats
/// can coexist. `V1` is PBKDF2-HMAC-SHA256 with `V1_ITERATIONS` rounds
/// feeding AES-256-GCM.
pub const KDF_VERSION_V1: u8 = 1;
const V1_ITERATIONS: u32 = 200_000;

/// A symmetric key derived from the shared archive password and a
/// per-bundle salt. Provides authenticated encryption for bundle payloads.
pub struct EncryptionKey {
    cipher: Aes256Gcm,
}

impl EncryptionKey {
    /// Derive a key for the given KDF version. Only `KDF_VERSION_V1` exists
    /// today; unknown versions are rejected so a future format bump cannot
    /// silently derive the wrong key.
    pub fn derive(password: &str, version: u8, salt: &[u8; SALT_LEN]) -> Result<Self> {
        let iterations = match version {
            KDF_VERSION_V1 => V1_ITERATIONS,
            other => {
                return Err(TaskError::BundleSchema(format!(
                    "unsupported kdf version {other}"
                )));
            }
        };

        let mut key_bytes = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`. Nonces are
    /// generated fresh per call; pack() is therefore not byte-deterministic.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| TaskError::Internal("encryption failure".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext` produced by [`encrypt`](Self::encrypt).
    /// Any tampering or key mismatch surfaces as [`TaskError::BundleAuth`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(TaskError::BundleAuth);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TaskError::BundleAuth)
    }
}

/// Generate a fresh random salt for a new bundle.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let salt = generate_salt();
        let key = EncryptionKey::derive("correct horse", KDF_VERSION_V1, &salt).unwrap();
        let plaintext = b"hello subtitles";
        let encrypted = key.encrypt(plaintext).unwrap();
        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_password_fails_auth() {
        let salt = generate_salt();
        let key = EncryptionKey::derive("correct horse", KDF_VERSION_V1, &salt).unwrap();
        let encrypted = key.encrypt(b"payload").unwrap();

        let wrong_key = EncryptionKey::derive("incorrect horse", KDF_VERSION_V1, &salt).unwrap();
        let result = wrong_key.decrypt(&encrypted);
        assert!(matches!(result, Err(TaskError::BundleAuth)));
    }

    #[test]
    fn tampered_byte_fails_auth() {
        let salt = generate_salt();
        let key = EncryptionKey::derive("pw", KDF_VERSION_V1, &salt).unwrap();
        let mut encrypted = key.encrypt(b"0123456789").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(key.decrypt(&encrypted), Err(TaskError::BundleAuth)));
    }

    #[test]
    fn unsupported_kdf_version_rejected() {
        let salt = generate_salt();
        assert!(EncryptionKey::derive("pw", 99, &salt).is_err());
    }
}
