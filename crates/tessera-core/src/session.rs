//! Session tokens.
//!
//! A session token is an opaque, verifiable reference to a user:
//!
//! ```text
//! base64url(json { "sub": <user uuid>, "iat": <unix>, "exp": <unix> }) "." hex(hmac-sha256)
//! ```
//!
//! The claims deliberately carry no tenant or role. Membership and
//! permissions are re-read from the directory on every request, so a role
//! change or tenant reassignment takes effect immediately instead of when
//! the token expires.
//!
//! Verification is all-or-nothing: a token that fails any structural check
//! is treated exactly like a missing token.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

/// Verified session claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClaims {
    /// The user this session belongs to.
    pub sub: Uuid,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Issues and verifies session tokens with a shared HMAC key.
pub struct SessionSigner {
    /// Keyed MAC, cloned per token.
    mac: HmacSha256,
    ttl: Duration,
}

impl SessionSigner {
    /// Create a signer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Malformed`] if the key is shorter than
    /// [`MIN_KEY_LEN`] bytes.
    pub fn new(key: &[u8], ttl: Duration) -> Result<Self, SessionError> {
        if key.len() < MIN_KEY_LEN {
            return Err(SessionError::Malformed {
                reason: format!("signing key must be at least {MIN_KEY_LEN} bytes"),
            });
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|e| SessionError::Malformed {
            reason: format!("invalid signing key: {e}"),
        })?;
        Ok(Self { mac, ttl })
    }

    /// Issue a token for `user_id`, valid from `now` for the signer's TTL.
    #[must_use]
    pub fn issue(&self, user_id: Uuid, now: DateTime<Utc>) -> String {
        let claims = SessionClaims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        // Serializing a struct of a UUID and two integers cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        format!("{payload}.{signature}")
    }

    /// Verify a token and return its claims.
    ///
    /// The signature is checked before the payload is decoded, so
    /// unauthenticated bytes never reach the JSON parser.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Malformed`] for any structural problem.
    /// - [`SessionError::BadSignature`] if the MAC does not match.
    /// - [`SessionError::Expired`] if `now` is at or past `exp`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let (payload, signature) = token.split_once('.').ok_or_else(|| SessionError::Malformed {
            reason: "expected 'payload.signature'".to_owned(),
        })?;

        if payload.is_empty() || signature.contains('.') {
            return Err(SessionError::Malformed {
                reason: "expected exactly two non-empty parts".to_owned(),
            });
        }

        let signature = hex::decode(signature).map_err(|e| SessionError::Malformed {
            reason: format!("signature is not hex: {e}"),
        })?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| SessionError::Malformed {
                reason: format!("payload is not base64url: {e}"),
            })?;

        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|e| SessionError::Malformed {
                reason: format!("invalid claims: {e}"),
            })?;

        if claims.exp <= claims.iat {
            return Err(SessionError::Malformed {
                reason: "expiry precedes issue time".to_owned(),
            });
        }

        if now.timestamp() >= claims.exp {
            return Err(SessionError::Expired {
                expired_at: claims.exp,
            });
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("key", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
