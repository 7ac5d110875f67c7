//! Webhook signature verification.
//!
//! The provider signs each delivery with a header of the form
//!
//! ```text
//! t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]
//! ```
//!
//! where each `v1` is `HMAC-SHA256(secret, "<t>." || raw_body)`. Several
//! `v1` entries appear while the provider rotates secrets; any one match is
//! enough. Other schemes (`v0`, ...) are ignored.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the signature.
pub const SIGNATURE_HEADER: &str = "billing-signature";

/// Default maximum age of a signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// A parsed signature header.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed {
                    reason: "timestamp is not an integer".to_owned(),
                })?);
            }
            // A v1 entry that is not hex can never match; skip it.
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed {
        reason: "missing timestamp".to_owned(),
    })?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed {
            reason: "no v1 signature".to_owned(),
        });
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Compute the `v1` digest for a payload signed at `timestamp`.
fn digest(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Malformed {
        reason: "unusable signing secret".to_owned(),
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify a delivery against the shared secret.
///
/// The timestamp window is symmetric: deliveries signed more than
/// `tolerance_secs` in the past or future are rejected.
///
/// # Errors
///
/// - [`SignatureError::Missing`] if `header` is `None`.
/// - [`SignatureError::Malformed`] if the header cannot be parsed.
/// - [`SignatureError::OutsideTolerance`] if the timestamp is too far from `now`.
/// - [`SignatureError::Mismatch`] if no `v1` entry matches.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<i64, SignatureError> {
    let header = parse_header(header.ok_or(SignatureError::Missing)?)?;

    if now.timestamp().abs_diff(header.timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::OutsideTolerance {
            timestamp: header.timestamp,
            tolerance_secs,
        });
    }

    let expected = digest(secret, header.timestamp, payload)?;
    let matched = header
        .signatures
        .iter()
        .fold(subtle::Choice::from(0), |acc, candidate| {
            acc | expected.as_slice().ct_eq(candidate.as_slice())
        });

    if bool::from(matched) {
        Ok(header.timestamp)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a header value for `payload`. Used by tests and local tooling.
///
/// # Errors
///
/// Returns [`SignatureError::Malformed`] if the secret cannot key an HMAC.
pub fn sign(payload: &[u8], secret: &[u8], timestamp: i64) -> Result<String, SignatureError> {
    let digest = digest(secret, timestamp, payload)?;
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}
