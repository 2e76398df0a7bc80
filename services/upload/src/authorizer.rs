use crate::config::UploadMode;
use crate::error::ApiError;
use crate::object_key::derive_key;
use crate::object_store::ObjectStore;
use crate::upload_token::UploadTokenSigner;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A time-boxed write credential for exactly one object key.
///
/// In presigned mode `upload_url` targets the store directly; in relay mode
/// it targets this service's `/upload/{key}` route with an embedded token.
/// Neither grants read or delete, and neither is valid for any other key.
#[derive(Debug, Clone)]
pub struct UploadCredential {
    pub upload_url: String,
    pub key: String,
    pub public_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Relay-mode issuance state: the token signer plus the base URL relay
/// upload URLs are built against
pub struct RelayIssuer {
    pub signer: UploadTokenSigner,
    pub base_url: String,
}

/// Validates upload requests and issues write credentials.
///
/// Never writes to the store itself; issuing a credential has no side effect
/// beyond the signature computation.
pub struct UploadAuthorizer {
    store: Arc<dyn ObjectStore>,
    mode: UploadMode,
    key_prefix: String,
    presigned_expiry: Duration,
    relay: Option<RelayIssuer>,
}

impl UploadAuthorizer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        mode: UploadMode,
        key_prefix: String,
        presigned_expiry: Duration,
        relay: Option<RelayIssuer>,
    ) -> Self {
        Self {
            store,
            mode,
            key_prefix,
            presigned_expiry,
            relay,
        }
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    /// Derive a key for `file_name` and issue the configured credential variant.
    ///
    /// `file_name` has already been validated non-empty at the route boundary.
    pub async fn authorize(
        &self,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<UploadCredential, ApiError> {
        let key = derive_key(&self.key_prefix, file_name);
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);

        match self.mode {
            UploadMode::Presigned => {
                let signed = self
                    .store
                    .sign_put_url(&key, content_type, self.presigned_expiry)
                    .await
                    .map_err(ApiError::Signing)?;

                debug!(key = %key, expires_at = %signed.expires_at, "issued presigned credential");

                Ok(UploadCredential {
                    upload_url: signed.url,
                    public_url: self.store.public_url(&key),
                    expires_at: signed.expires_at,
                    key,
                })
            }
            UploadMode::Relay => {
                let relay = self
                    .relay
                    .as_ref()
                    .ok_or_else(|| ApiError::Signing(anyhow!("relay mode has no token signer")))?;

                let token = relay.signer.issue(&key);
                let upload_url = format!(
                    "{}/upload/{}?token={}&expires={}",
                    relay.base_url.trim_end_matches('/'),
                    key,
                    token.value,
                    token.expires_at.timestamp()
                );

                debug!(key = %key, expires_at = %token.expires_at, "issued relay credential");

                Ok(UploadCredential {
                    upload_url,
                    public_url: self.store.public_url(&key),
                    expires_at: token.expires_at,
                    key,
                })
            }
        }
    }
}
