//! Bearer token minting.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::Result;

/// Claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated subject (username)
    pub sub: String,
    /// Expiration time, seconds since the Unix epoch
    pub exp: i64,
}

/// Signs access tokens with the configured secret and algorithm.
pub struct TokenIssuer {
    key: EncodingKey,
    header: Header,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key: EncodingKey::from_secret(config.secret.as_bytes()),
            header: Header::new(config.algorithm),
            ttl: Duration::minutes(config.access_token_expire_minutes),
        }
    }

    /// Mint a token for `subject` that expires after the configured lifetime.
    pub fn issue(&self, subject: &str) -> Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        Ok(encode(&self.header, &claims, &self.key)?)
    }
}
