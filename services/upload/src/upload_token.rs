use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a presented relay token was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("upload token expired")]
    Expired,
    #[error("upload token malformed")]
    Malformed,
    #[error("upload token does not match key")]
    Mismatch,
}

/// A relay upload token bound to one object key and expiry instant
#[derive(Debug, Clone)]
pub struct RelayToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies the signed tokens embedded in relay upload URLs.
///
/// The token is an HMAC-SHA256 over `key || "\n" || expires_unix`, so any
/// change to the key or the expiry invalidates it. Tokens are stateless and
/// therefore reusable until expiry, the same validity semantics a presigned
/// URL has.
#[derive(Clone)]
pub struct UploadTokenSigner {
    secret: Vec<u8>,
    ttl: chrono::Duration,
}

impl UploadTokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600)),
        }
    }

    /// Issue a token authorizing one PUT of `key`, valid for the configured window
    pub fn issue(&self, key: &str) -> RelayToken {
        let expires_at = Utc::now() + self.ttl;
        RelayToken {
            value: self.sign(key, expires_at.timestamp()),
            expires_at,
        }
    }

    /// Verify a presented token against the exact key and expiry it claims.
    ///
    /// Expiry is checked first; the MAC comparison is constant-time.
    pub fn verify(&self, key: &str, token: &str, expires_unix: i64) -> Result<(), TokenError> {
        if expires_unix < Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        let presented = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        feed(&mut mac, key, expires_unix);
        mac.verify_slice(&presented)
            .map_err(|_| TokenError::Mismatch)
    }

    fn sign(&self, key: &str, expires_unix: i64) -> String {
        let mut mac = self.mac();
        feed(&mut mac, key, expires_unix);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("HMAC key length is unrestricted")
    }
}

fn feed(mac: &mut HmacSha256, key: &str, expires_unix: i64) {
    mac.update(key.as_bytes());
    mac.update(b"\n");
    mac.update(&expires_unix.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UploadTokenSigner {
        UploadTokenSigner::new("relay-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_issued_token_verifies() {
        let signer = signer();
        let token = signer.issue("uploads/1700000000000-doc.png");

        assert!(signer
            .verify(
                "uploads/1700000000000-doc.png",
                &token.value,
                token.expires_at.timestamp()
            )
            .is_ok());
    }

    #[test]
    fn test_token_is_bound_to_key() {
        let signer = signer();
        let token = signer.issue("uploads/1-a.png");

        assert_eq!(
            signer.verify("uploads/1-b.png", &token.value, token.expires_at.timestamp()),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_expiry_is_rejected() {
        let signer = signer();
        let token = signer.issue("uploads/1-a.png");

        // Extending the claimed expiry breaks the MAC
        assert_eq!(
            signer.verify(
                "uploads/1-a.png",
                &token.value,
                token.expires_at.timestamp() + 60
            ),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn test_expired_token_is_rejected_before_mac_check() {
        let signer = signer();
        let past = Utc::now().timestamp() - 10;
        let stale = signer.sign("uploads/1-a.png", past);

        assert_eq!(
            signer.verify("uploads/1-a.png", &stale, past),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let signer = signer();
        let expires = Utc::now().timestamp() + 60;

        assert_eq!(
            signer.verify("uploads/1-a.png", "not base64!!", expires),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret_does_not_verify() {
        let token = signer().issue("uploads/1-a.png");
        let other = UploadTokenSigner::new("different-secret", Duration::from_secs(3600));

        assert_eq!(
            other.verify("uploads/1-a.png", &token.value, token.expires_at.timestamp()),
            Err(TokenError::Mismatch)
        );
    }
}
