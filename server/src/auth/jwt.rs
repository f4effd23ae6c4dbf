use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::AuthFailure;

/// Session token claims. `exp` is optional: tokens minted without an
/// expiry stay valid until the signing secret rotates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Verifies a raw session token and resolves it to an identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw_token: &str) -> Result<Identity, AuthFailure>;
}

/// HS256 verifier over a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is still checked when present
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, raw_token: &str) -> Result<Identity, AuthFailure> {
        if raw_token.is_empty() {
            return Err(AuthFailure::MissingToken);
        }
        let data = decode::<Claims>(raw_token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            AuthFailure::InvalidToken
        })?;
        if data.claims.user_id.is_empty() {
            return Err(AuthFailure::InvalidToken);
        }
        Ok(Identity {
            user_id: data.claims.user_id,
            username: data.claims.username,
        })
    }
}

/// Mint a session token for `identity`, optionally expiring after `ttl_secs`.
pub fn issue_token(
    secret: &[u8],
    identity: &Identity,
    ttl_secs: Option<i64>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        iat: now,
        exp: ttl_secs.map(|ttl| now + ttl),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Load the signing secret from `data_dir/jwt_secret`, generating a fresh
/// 256-bit key if the file is missing or malformed.
pub fn load_or_generate_jwt_secret(data_dir: &Path) -> std::io::Result<Vec<u8>> {
    let key_path = data_dir.join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    std::fs::create_dir_all(data_dir)?;
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}
