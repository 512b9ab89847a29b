use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use crate::{config::EncryptionConfig, error::Result, Error, ErrorCode};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Output of one encryption operation. Maps 1:1 onto the
/// `encrypted_credentials` columns: nonce and GCM tag are stored separately
/// from the ciphertext body.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub key_version: i32,
}

/// AES-256-GCM cipher for OAuth credentials at rest, keyed by the
/// per-deployment master key.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
    key_version: i32,
}

impl CredentialCipher {
    pub fn new(config: &EncryptionConfig) -> Result<Self> {
        let key_bytes = config.master_key.as_bytes();

        if key_bytes.len() != 32 {
            return Err(Error::new(
                ErrorCode::EncryptionError,
                "AES key must be exactly 32 bytes",
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);

        Ok(Self {
            cipher,
            key_version: config.key_version,
        })
    }

    pub fn key_version(&self) -> i32 {
        self.key_version
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::new(ErrorCode::EncryptionError, format!("encryption failed: {}", e)))?;

        // aes-gcm appends the 16-byte tag to the ciphertext body.
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

        Ok(EncryptedPayload {
            ciphertext,
            iv: nonce.to_vec(),
            tag,
            key_version: self.key_version,
        })
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        if payload.key_version != self.key_version {
            return Err(Error::crypto_validation(format!(
                "ciphertext written under key version {} but deployment holds version {}",
                payload.key_version, self.key_version
            )));
        }

        if payload.iv.len() != NONCE_LEN || payload.tag.len() != TAG_LEN {
            return Err(Error::new(
                ErrorCode::DecryptionError,
                "invalid nonce or tag length",
            ));
        }

        let nonce = Nonce::from_slice(&payload.iv);
        let mut sealed = payload.ciphertext.clone();
        sealed.extend_from_slice(&payload.tag);

        self.cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|e| Error::new(ErrorCode::DecryptionError, format!("decryption failed: {}", e)))
    }

    /// Encrypt and immediately verify that the payload decrypts back to the
    /// original bytes. Writers use this so unverifiable ciphertext is never
    /// committed.
    pub fn encrypt_verified(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let payload = self.encrypt(plaintext)?;
        let round_trip = self.decrypt(&payload)?;

        if round_trip != plaintext {
            return Err(Error::crypto_validation(
                "round-trip decryption did not reproduce the plaintext",
            ));
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EncryptionConfig {
        EncryptionConfig {
            master_key: "12345678901234567890123456789012".to_string(),
            key_version: 1,
        }
    }

    #[test]
    fn test_round_trip() {
        let cipher = CredentialCipher::new(&test_config()).unwrap();
        let plaintext = br#"{"access_token":"xoxb-secret","token_type":"Bearer"}"#;

        let payload = cipher.encrypt_verified(plaintext).unwrap();
        assert_eq!(payload.iv.len(), NONCE_LEN);
        assert_eq!(payload.tag.len(), TAG_LEN);
        assert_ne!(payload.ciphertext, plaintext.to_vec());

        let decrypted = cipher.decrypt(&payload).unwrap();
        assert_eq!(decrypted, plaintext.to_vec());
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let cipher = CredentialCipher::new(&test_config()).unwrap();
        let mut payload = cipher.encrypt(b"secret").unwrap();
        payload.tag[0] ^= 0xff;
        assert!(cipher.decrypt(&payload).is_err());
    }

    #[test]
    fn test_key_version_mismatch_rejected() {
        let cipher = CredentialCipher::new(&test_config()).unwrap();
        let mut payload = cipher.encrypt(b"secret").unwrap();
        payload.key_version = 2;

        let err = cipher.decrypt(&payload).unwrap_err();
        assert_eq!(err.code, ErrorCode::CryptoValidation);
    }

    #[test]
    fn test_short_key_rejected() {
        let config = EncryptionConfig {
            master_key: "too-short".to_string(),
            key_version: 1,
        };
        assert!(CredentialCipher::new(&config).is_err());
    }
}
