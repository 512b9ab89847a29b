//! Short-lived signed tokens for realtime socket authentication.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use singura_core::{config::AuthConfig, Error, ErrorCode, Result, Uuid};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketClaims {
    /// End-user id as supplied by the outer authentication layer.
    pub sub: String,
    /// Organization the socket may join.
    pub org: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub struct SocketTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl SocketTokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.socket_token_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.socket_token_secret.as_bytes()),
            ttl_seconds: config.socket_token_ttl_seconds,
        }
    }

    pub fn issue(&self, user_id: &str, organization_id: Uuid) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = SocketClaims {
            sub: user_id.to_string(),
            org: organization_id,
            iat: now,
            exp: now + self.ttl_seconds,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::new(ErrorCode::TokenInvalid, e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<SocketClaims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SocketClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::new(ErrorCode::TokenExpired, "socket token expired")
                }
                _ => Error::new(ErrorCode::TokenInvalid, e.to_string()),
            })
    }
}
