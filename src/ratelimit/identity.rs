//! Client identity resolution.
//!
//! Every request maps to a [`ClientKey`], first match wins:
//! 1. `user:<sub>` from a bearer token that decodes with the configured key,
//! 2. the first `X-Forwarded-For` hop,
//! 3. the connection's peer IP.

use std::fmt;
use std::net::SocketAddr;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tracing::trace;

use crate::config::AuthConfig;

/// Forwarded-address header consulted when no credential identifies the client.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Key used when the transport did not report a peer address.
const UNKNOWN_PEER: &str = "unknown";

/// Identifies the rate-limited subject of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The parts of an inbound request the limiter looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Request path, without query string
    pub path: &'a str,
    /// Request headers
    pub headers: &'a HeaderMap,
    /// Peer address of the connection, when the transport exposes it
    pub remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Deserialize)]
struct SubjectClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// Derives a [`ClientKey`] from request data. Resolution never fails.
#[derive(Clone)]
pub struct IdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("algorithms", &self.validation.algorithms)
            .field("validate_exp", &self.validation.validate_exp)
            .finish()
    }
}

impl IdentityResolver {
    /// Create a resolver that verifies bearer tokens with `config`'s secret
    /// and algorithm.
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(config.algorithm);
        validation.validate_exp = config.verify_expiry;
        // Tokens without `exp` still identify their subject.
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Resolve the client key for `request`.
    pub fn resolve(&self, request: &RequestInfo<'_>) -> ClientKey {
        if let Some(subject) = self.bearer_subject(request.headers) {
            return ClientKey(format!("user:{}", subject));
        }

        if let Some(addr) = forwarded_for(request.headers) {
            return ClientKey(addr.to_string());
        }

        let peer = request
            .remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_PEER.to_string());
        ClientKey(peer)
    }

    /// Subject of a valid bearer token, if any. Every decode failure
    /// (bad signature, expired, malformed, no subject) yields `None`.
    fn bearer_subject(&self, headers: &HeaderMap) -> Option<String> {
        let token = headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;

        match decode::<SubjectClaims>(token, &self.key, &self.validation) {
            Ok(data) => data.claims.sub.filter(|s| !s.is_empty()),
            Err(e) => {
                trace!(error = %e, "Ignoring undecodable bearer token for client identity");
                None
            }
        }
    }
}

/// First hop of the `X-Forwarded-For` header, trimmed, if non-empty.
fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}
