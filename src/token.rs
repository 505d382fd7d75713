use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::IpAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::session::{CsrfToken, SessionContext};

/// Default CSRF token maximum age in seconds
pub const DEFAULT_CSRF_MAX_AGE: u64 = 3600;

/// Reasons a capability token is rejected. Logged server-side with detail;
/// callers should surface only a generic authentication failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("issuing IP does not match presenting IP")]
    IpMismatch,
}

/// Signed claims embedded in a capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    pub user_id: u64,
    pub stream_id: u64,
    /// Unix seconds after which the token is invalid
    pub expires: u64,
    /// Client IP the token was issued to
    pub ip: String,
}

/// Issues and validates CSRF tokens and HMAC-signed capability tokens.
pub struct TokenService {
    secret: Vec<u8>,
    /// When true, capability tokens are only valid from their issuing IP.
    strict_ip: bool,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, strict_ip: bool) -> Self {
        Self {
            secret: secret.into(),
            strict_ip,
        }
    }

    // --- CSRF ---

    /// Return the session's live CSRF token, creating one if absent.
    ///
    /// A stored token is returned regardless of age; expiry is enforced at
    /// validation, which discards the stale token so the next issue call
    /// mints a fresh one.
    pub fn issue_csrf(&self, session: &mut SessionContext) -> String {
        if let Some(ref token) = session.csrf_token {
            return token.value.clone();
        }
        self.rotate_csrf(session)
    }

    /// Unconditionally generate a fresh CSRF token for the session.
    /// Called after a successful login so the pre-auth token cannot be replayed.
    pub fn rotate_csrf(&self, session: &mut SessionContext) -> String {
        let value = random_hex_token();
        session.csrf_token = Some(CsrfToken {
            value: value.clone(),
            issued_at: Instant::now(),
        });
        value
    }

    /// Validate a submitted CSRF token against the session's stored one.
    ///
    /// Returns false (never errors) when no token is stored, the candidate is
    /// empty, the stored token is older than `max_age` (the stored token is
    /// discarded in that case), or the values differ. Comparison is
    /// constant-time.
    pub fn validate_csrf(
        &self,
        session: &mut SessionContext,
        candidate: &str,
        max_age: Duration,
    ) -> bool {
        let stored = match session.csrf_token {
            Some(ref token) => token,
            None => return false,
        };
        if candidate.is_empty() {
            return false;
        }
        if stored.issued_at.elapsed() > max_age {
            debug!("CSRF token expired, discarding");
            session.csrf_token = None;
            return false;
        }

        let a = stored.value.as_bytes();
        let b = candidate.as_bytes();
        a.len() == b.len() && bool::from(a.ct_eq(b))
    }

    // --- Capability tokens ---

    /// Issue a signed, time-limited capability token granting `user_id`
    /// access to `stream_id`, pinned to the requesting client IP.
    ///
    /// Wire format: `base64(json_payload) "." hex(hmac_sha256(base64_payload))`.
    pub fn issue_capability(
        &self,
        user_id: u64,
        stream_id: u64,
        ttl: Duration,
        client_ip: IpAddr,
    ) -> String {
        let claims = CapabilityClaims {
            user_id,
            stream_id,
            expires: unix_now().saturating_add(ttl.as_secs()),
            ip: client_ip.to_string(),
        };
        // CapabilityClaims serialization cannot fail (no maps, no non-string keys)
        let json = serde_json::to_string(&claims).expect("claims serialize");
        let payload = base64::engine::general_purpose::STANDARD.encode(json);
        let signature = self.sign(payload.as_bytes());
        format!("{}.{}", payload, signature)
    }

    /// Verify a capability token and return its claims.
    ///
    /// The signature is checked in constant time over the exact base64 payload
    /// before it is decoded; an expired token is rejected even when the
    /// signature is valid.
    pub fn verify_capability(&self, token: &str) -> Result<CapabilityClaims, TokenError> {
        let mut parts = token.split('.');
        let (payload, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(s), None) => (p, s),
            _ => return Err(TokenError::Malformed),
        };

        let expected = self.sign(payload.as_bytes());
        let a = expected.as_bytes();
        let b = signature.as_bytes();
        if a.len() != b.len() || !bool::from(a.ct_eq(b)) {
            warn!("capability token signature mismatch");
            return Err(TokenError::BadSignature);
        }

        let json = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: CapabilityClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if unix_now() > claims.expires {
            debug!(
                user_id = claims.user_id,
                stream_id = claims.stream_id,
                "capability token expired"
            );
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify a capability token presented from `client_ip`.
    ///
    /// In strict mode the token must be presented from its issuing IP;
    /// otherwise the IP claim is informational only.
    pub fn verify_capability_for_ip(
        &self,
        token: &str,
        client_ip: IpAddr,
    ) -> Result<CapabilityClaims, TokenError> {
        let claims = self.verify_capability(token)?;
        if self.strict_ip && claims.ip != client_ip.to_string() {
            warn!(
                issued_to = %claims.ip,
                presented_from = %client_ip,
                "capability token IP pinning rejected"
            );
            return Err(TokenError::IpMismatch);
        }
        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// 256 bits of CSPRNG output, hex-encoded (64 chars).
fn random_hex_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
