//! Upload Service
//!
//! Authorizes direct-to-storage uploads for the listings platform. A client
//! asks for permission to upload one named file; the service derives a safe
//! object key and issues a time-boxed write credential: either a presigned
//! PUT URL against the store itself, or a same-origin relay URL whose bytes
//! this service streams through to the store.
//!
//! ```text
//! Client ──POST /api/sign-upload──▶ Authorizer ──▶ key + credential
//!    │                                  │
//!    │  presigned mode                  │  relay mode
//!    ▼                                  ▼
//! PUT <signed URL> ──▶ S3        PUT /upload/{key}?token=… ──▶ Relay ──▶ S3
//! ```
//!
//! The service holds no per-request state: the key deriver is a pure
//! function, credentials are self-validating (SigV4 signature or HMAC relay
//! token), and identical-key races resolve last-write-wins in the store.

pub mod api;
pub mod authorizer;
pub mod config;
pub mod error;
pub mod object_key;
pub mod object_store;
pub mod upload_token;

pub use api::{AppState, SignUploadRequest, SignUploadResponse};
pub use authorizer::{RelayIssuer, UploadAuthorizer, UploadCredential};
pub use config::{Config, UploadMode};
pub use error::ApiError;
pub use object_key::{derive_key, sanitize_file_name};
pub use object_store::{ObjectStore, S3ObjectStore, SignedUrl};
pub use upload_token::{RelayToken, TokenError, UploadTokenSigner};
