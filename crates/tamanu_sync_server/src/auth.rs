//! Facility authentication for the sync server.
//!
//! Tokens are HMAC-SHA256 signed and carry the facility id and an expiry.
//!
//! ## Token Format
//!
//! Three `.`-separated fields:
//! - `base64url(facility_id)` (no padding)
//! - expiry as Unix millis, decimal
//! - `base64url(HMAC-SHA256(secret, "<field 1>.<field 2>"))`

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            token_expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// The verified content of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityClaims {
    /// Facility the token was issued to.
    pub facility_id: String,
    /// Expiry in Unix millis.
    pub expires_at: u64,
}

/// Issues and validates facility tokens.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a facility, valid for the configured expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the facility id is empty.
    pub fn create_token(&self, facility_id: &str) -> ServerResult<String> {
        let expiry_ms = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        self.create_token_expiring(facility_id, now_ms().saturating_add(expiry_ms))
    }

    /// Creates a token expiring at the given Unix millis.
    ///
    /// # Errors
    ///
    /// Returns an error if the facility id is empty.
    pub fn create_token_expiring(&self, facility_id: &str, expires_at: u64) -> ServerResult<String> {
        if facility_id.is_empty() {
            return Err(ServerError::InvalidRequest("facility id is empty".into()));
        }
        let payload = format!("{}.{expires_at}", URL_SAFE_NO_PAD.encode(facility_id));
        let signature = self.mac(payload.as_bytes())?.finalize().into_bytes();
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Validates a token against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuthenticationFailed`] for malformed, tampered or
    /// expired tokens.
    pub fn validate(&self, token: &str) -> ServerResult<FacilityClaims> {
        self.validate_at(token, now_ms())
    }

    /// Validates a token as of `now` (Unix millis).
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate`].
    pub fn validate_at(&self, token: &str, now: u64) -> ServerResult<FacilityClaims> {
        let (payload, signature) = token.rsplit_once('.').ok_or_else(|| malformed("missing signature"))?;
        let (facility, expiry) = payload.split_once('.').ok_or_else(|| malformed("missing expiry"))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| malformed("signature is not base64url"))?;
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let expires_at: u64 = expiry.parse().map_err(|_| malformed("expiry is not a number"))?;
        if now >= expires_at {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        let facility_id = URL_SAFE_NO_PAD
            .decode(facility)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("bad facility id"))?;

        Ok(FacilityClaims {
            facility_id,
            expires_at,
        })
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

/// Extracts the token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

fn malformed(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(format!("malformed token: {reason}"))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new("test-secret-key-32-bytes-long!!"))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token("facility-a").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.facility_id, "facility-a");
    }

    #[test]
    fn reject_other_secret() {
        let token = validator().create_token("facility-a").unwrap();
        let other = TokenValidator::new(AuthConfig::new("another-secret"));
        assert!(matches!(
            other.validate(&token),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn reject_tampered_facility() {
        let validator = validator();
        let token = validator.create_token_expiring("facility-a", u64::MAX).unwrap();
        let (_, rest) = token.split_once('.').unwrap();
        let forged = format!("{}.{rest}", URL_SAFE_NO_PAD.encode("facility-b"));
        assert!(validator.validate(&forged).is_err());
    }

    #[test]
    fn reject_extended_expiry() {
        let validator = validator();
        let token = validator.create_token_expiring("facility-a", 1_000).unwrap();
        let forged = token.replacen(".1000.", ".9999999999999.", 1);
        assert!(validator.validate_at(&forged, 500).is_err());
        assert!(validator.validate_at(&token, 500).is_ok());
    }

    #[test]
    fn reject_expired_token() {
        let validator = validator();
        let token = validator.create_token_expiring("facility-a", 1_000).unwrap();
        let err = validator.validate_at(&token, 1_000).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn reject_malformed_tokens() {
        let validator = validator();
        for token in ["", "abc", "a.b", "a.b.c", "..."] {
            assert!(validator.validate(token).is_err(), "accepted {token:?}");
        }
        assert!(validator.create_token("").is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.1.x"), Some("abc.1.x"));
        assert_eq!(bearer_token("bearer   tok "), Some("tok"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
