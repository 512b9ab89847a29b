//! Encrypted credential store.
//!
//! OAuth credentials exist at rest only as AES-GCM ciphertext in the
//! `encrypted_credentials` table, keyed by connection id. Writes round-trip
//! the ciphertext (decrypt + byte-compare) before commit; an unverifiable
//! payload is never persisted. Log lines carry connection ids and platform
//! types, never token material.

use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use singura_core::{
    crypto::EncryptedPayload, CredentialCipher, OAuthCredentials, Uuid,
};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Encrypt and persist a credential set, replacing any existing row.
    async fn store(&self, connection_id: Uuid, credentials: &OAuthCredentials) -> Result<()>;

    /// Decrypt and return the credential set, or `None` when absent.
    async fn get(&self, connection_id: Uuid) -> Result<Option<OAuthCredentials>>;

    /// Erase the stored row.
    async fn remove(&self, connection_id: Uuid) -> Result<()>;
}

pub struct PostgresCredentialStore {
    pool: PgPool,
    cipher: Arc<CredentialCipher>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool, cipher: Arc<CredentialCipher>) -> Self {
        Self { pool, cipher }
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn store(&self, connection_id: Uuid, credentials: &OAuthCredentials) -> Result<()> {
        let plaintext = serde_json::to_vec(credentials)?;

        // encrypt_verified fails with CryptoValidation before anything is
        // written if the payload does not decrypt back byte-for-byte.
        let payload = self.cipher.encrypt_verified(&plaintext)?;

        sqlx::query(
            r#"
            INSERT INTO encrypted_credentials (platform_connection_id, ciphertext, iv, tag, key_version)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (platform_connection_id)
            DO UPDATE SET ciphertext = $2, iv = $3, tag = $4, key_version = $5, created_at = NOW()
            "#,
        )
        .bind(connection_id)
        .bind(&payload.ciphertext)
        .bind(&payload.iv)
        .bind(&payload.tag)
        .bind(payload.key_version)
        .execute(&self.pool)
        .await?;

        info!(connection_id = %connection_id, "Stored encrypted credentials");
        Ok(())
    }

    async fn get(&self, connection_id: Uuid) -> Result<Option<OAuthCredentials>> {
        let row = sqlx::query(
            r#"
            SELECT ciphertext, iv, tag, key_version
            FROM encrypted_credentials
            WHERE platform_connection_id = $1
            "#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(connection_id = %connection_id, "No stored credentials");
            return Ok(None);
        };

        let payload = EncryptedPayload {
            ciphertext: row.get("ciphertext"),
            iv: row.get("iv"),
            tag: row.get("tag"),
            key_version: row.get("key_version"),
        };

        let plaintext = self.cipher.decrypt(&payload)?;
        let credentials: OAuthCredentials = serde_json::from_slice(&plaintext)?;

        Ok(Some(credentials))
    }

    async fn remove(&self, connection_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM encrypted_credentials WHERE platform_connection_id = $1")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;

        info!(connection_id = %connection_id, "Removed stored credentials");
        Ok(())
    }
}

/// In-memory store used by tests and the single-flight refresh harness.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: dashmap::DashMap<Uuid, OAuthCredentials>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn store(&self, connection_id: Uuid, credentials: &OAuthCredentials) -> Result<()> {
        // Mirror the production write path's verification contract.
        let bytes = serde_json::to_vec(credentials)?;
        let round_trip: OAuthCredentials = serde_json::from_slice(&bytes)?;
        if &round_trip != credentials {
            return Err(PlatformError::Core(singura_core::Error::crypto_validation(
                "round-trip serialization did not reproduce the credentials",
            )));
        }

        self.entries.insert(connection_id, credentials.clone());
        Ok(())
    }

    async fn get(&self, connection_id: Uuid) -> Result<Option<OAuthCredentials>> {
        Ok(self.entries.get(&connection_id).map(|e| e.clone()))
    }

    async fn remove(&self, connection_id: Uuid) -> Result<()> {
        self.entries.remove(&connection_id);
        Ok(())
    }
}
