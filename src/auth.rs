//! Authentication
//!
//! Provides:
//! - Bearer token signing and verification (HS256)
//! - Identity provider verification (provider token -> verified email)
//!
//! Expiry is checked against the injected clock, not the system time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::types::UserId;

// ============================================================================
// BEARER TOKENS
// ============================================================================

/// Bearer token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn sign(&self, user_id: UserId, now: DateTime<Utc>) -> ApiResult<String> {
        let iat = now.timestamp();
        let claims = Claims {
            user_id,
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))
    }

    /// Any failure (bad signature, malformed, expired) is `UNAUTHORIZED`
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!("Rejected bearer token: {}", e);
                ApiError::Unauthorized
            })?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(ApiError::Unauthorized);
        }
        Ok(claims)
    }
}

// ============================================================================
// IDENTITY PROVIDER
// ============================================================================

/// Turns a provider login token into a verified email address
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, provider_token: &str) -> Result<String>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    email: String,
}

/// Posts the provider token to a verification endpoint that answers `{email}`
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpIdentityVerifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, provider_token: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest {
                token: provider_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Identity provider returned HTTP {}", response.status());
        }

        let body: VerifyResponse = response.json().await?;
        let email = body.email.trim().to_string();
        if email.is_empty() {
            anyhow::bail!("Identity provider returned no email");
        }
        Ok(email)
    }
}

/// Rejects every login; used when no provider is configured
pub struct DisabledIdentityVerifier;

#[async_trait]
impl IdentityVerifier for DisabledIdentityVerifier {
    async fn verify(&self, _provider_token: &str) -> Result<String> {
        anyhow::bail!("Identity provider is not configured")
    }
}
