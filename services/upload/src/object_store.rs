use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Inbound upload body, consumed chunk by chunk
pub type ByteChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// A presigned PUT URL with its absolute expiry instant
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Narrow write-side interface to the backing object store.
///
/// The authorizer and relay handler are written against this trait so the
/// concrete storage backend stays swappable (and mockable in tests).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Presign a PUT of `key` with the given content type, valid for `expires_in`
    async fn sign_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<SignedUrl>;

    /// Stream an upload body to the store under `key`.
    ///
    /// Returns the number of bytes written. A re-PUT of the same key is a
    /// full overwrite; no partial object state survives a failure.
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        body: ByteChunkStream,
    ) -> Result<u64>;

    /// Deterministic public retrieval URL for `key`
    fn public_url(&self, key: &str) -> String;

    /// Reachability probe used by the readiness endpoint
    async fn healthy(&self) -> bool;
}

/// S3-compatible implementation of [`ObjectStore`]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: Option<String>,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3ObjectStore {
    /// Create a new store client from immutable startup configuration
    pub async fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "upload-service-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/R2/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "object store client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            public_base_url: config.public_base_url.clone(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        })
    }

    /// Single-part upload for bodies below the multipart threshold
    async fn simple_put(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context("failed to write object to store")?;

        Ok(())
    }

    /// Multipart upload fed incrementally from the inbound stream.
    ///
    /// At most one part is buffered at a time, so large bodies are never
    /// fully materialized in memory.
    async fn multipart_put(
        &self,
        key: &str,
        content_type: &str,
        mut buffer: Vec<u8>,
        mut body: ByteChunkStream,
    ) -> Result<u64> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("no upload ID in multipart response")?
            .to_string();

        let result = self
            .upload_parts(key, &upload_id, &mut buffer, &mut body)
            .await;

        match result {
            Ok(total) => Ok(total),
            Err(e) => {
                // Leave no dangling multipart state behind a failed relay
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        buffer: &mut Vec<u8>,
        body: &mut ByteChunkStream,
    ) -> Result<u64> {
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut total = buffer.len() as u64;

        loop {
            for part in drain_full_parts(buffer, self.part_size_bytes) {
                completed_parts.push(self.upload_part(key, upload_id, part_number, part).await?);
                part_number += 1;
            }

            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("failed to read upload body")?;
                    total += chunk.len() as u64;
                    buffer.extend_from_slice(&chunk);
                }
                None => break,
            }
        }

        // Final (possibly short) part
        if !buffer.is_empty() {
            let part = std::mem::take(buffer);
            completed_parts.push(self.upload_part(key, upload_id, part_number, part).await?);
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("failed to complete multipart upload")?;

        Ok(total)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .context("failed to upload part")?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(response.e_tag().unwrap_or_default())
            .build())
    }
}

/// How a relayed body will reach the store
#[derive(Debug)]
enum UploadPlan {
    /// Body ended at or below the threshold; everything it carried is buffered
    Single(Vec<u8>),
    /// Body crossed the threshold; the buffer holds what has been read so far
    Multipart(Vec<u8>),
}

/// Read from `body` until it either ends (single PUT) or exceeds `threshold`
/// (streamed multipart upload)
async fn plan_upload(threshold: usize, body: &mut ByteChunkStream) -> Result<UploadPlan> {
    let mut buffer: Vec<u8> = Vec::new();

    while buffer.len() <= threshold {
        match body.next().await {
            Some(chunk) => {
                let chunk = chunk.context("failed to read upload body")?;
                buffer.extend_from_slice(&chunk);
            }
            None => return Ok(UploadPlan::Single(buffer)),
        }
    }

    Ok(UploadPlan::Multipart(buffer))
}

/// Split every full `part_size` run off the front of `buffer`, leaving the
/// remainder (possibly empty) in place for the next round
fn drain_full_parts(buffer: &mut Vec<u8>, part_size: usize) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();
    while buffer.len() >= part_size {
        parts.push(buffer.drain(..part_size).collect());
    }
    parts
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn sign_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<SignedUrl> {
        let presigning_config =
            PresigningConfig::expires_in(expires_in).context("failed to create presigning config")?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .context("failed to presign upload URL")?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).context("presign expiry out of range")?;

        debug!(key = %key, expires_at = %expires_at, "presigned upload URL issued");

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        mut body: ByteChunkStream,
    ) -> Result<u64> {
        match plan_upload(self.multipart_threshold_bytes, &mut body).await? {
            UploadPlan::Single(data) => {
                let total = data.len() as u64;
                self.simple_put(key, content_type, data).await?;
                debug!(key = %key, size_bytes = total, "object stored");
                Ok(total)
            }
            UploadPlan::Multipart(buffer) => {
                let total = self.multipart_put(key, content_type, buffer, body).await?;
                debug!(key = %key, size_bytes = total, "object stored via multipart upload");
                Ok(total)
            }
        }
    }

    fn public_url(&self, key: &str) -> String {
        if let Some(ref base) = self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(ref endpoint) = self.endpoint_url {
            // Path-style URL for S3-compatible providers
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    async fn healthy(&self) -> bool {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Region;

    fn test_store(endpoint_url: Option<&str>, public_base_url: Option<&str>) -> S3ObjectStore {
        let credentials = Credentials::new("test", "test", None, None, "test");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .build();

        S3ObjectStore {
            client: S3Client::from_conf(config),
            bucket: "listings".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: endpoint_url.map(String::from),
            public_base_url: public_base_url.map(String::from),
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        }
    }

    fn chunk_stream(chunks: Vec<&'static [u8]>) -> ByteChunkStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<Bytes, anyhow::Error>(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn test_plan_upload_body_below_threshold_is_single_put() {
        let mut body = chunk_stream(vec![b"hello ", b"world"]);

        match plan_upload(64, &mut body).await.unwrap() {
            UploadPlan::Single(data) => assert_eq!(data, b"hello world"),
            other => panic!("expected single PUT plan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_upload_body_exactly_at_threshold_is_single_put() {
        let mut body = chunk_stream(vec![b"12345678"]);

        match plan_upload(8, &mut body).await.unwrap() {
            UploadPlan::Single(data) => assert_eq!(data, b"12345678"),
            other => panic!("expected single PUT plan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_upload_body_crossing_threshold_is_multipart() {
        let mut body = chunk_stream(vec![b"123456", b"789"]);

        match plan_upload(8, &mut body).await.unwrap() {
            // Everything read so far stays in the buffer; nothing is lost
            UploadPlan::Multipart(buffer) => assert_eq!(buffer, b"123456789"),
            other => panic!("expected multipart plan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_upload_propagates_body_read_errors() {
        let mut body: ByteChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(anyhow::anyhow!("client disconnected")),
        ]));

        assert!(plan_upload(64, &mut body).await.is_err());
    }

    #[test]
    fn test_drain_full_parts_splits_exact_runs() {
        let mut buffer: Vec<u8> = (0u8..19).collect();
        let original = buffer.clone();

        let parts = drain_full_parts(&mut buffer, 8);

        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 8));
        assert_eq!(buffer.len(), 3);

        // Parts plus remainder reassemble the original bytes in order
        let mut reassembled: Vec<u8> = parts.concat();
        reassembled.extend_from_slice(&buffer);
        assert_eq!(reassembled, original);
    }

    #[test]
    fn test_drain_full_parts_fenceposts() {
        let mut exact = vec![7u8; 8];
        let parts = drain_full_parts(&mut exact, 8);
        assert_eq!(parts.len(), 1);
        assert!(exact.is_empty());

        let mut short = vec![7u8; 7];
        assert!(drain_full_parts(&mut short, 8).is_empty());
        assert_eq!(short.len(), 7);

        let mut empty: Vec<u8> = Vec::new();
        assert!(drain_full_parts(&mut empty, 8).is_empty());
    }

    #[test]
    fn test_public_url_aws_form() {
        let store = test_store(None, None);
        assert_eq!(
            store.public_url("uploads/1-a.png"),
            "https://listings.s3.us-east-1.amazonaws.com/uploads/1-a.png"
        );
    }

    #[test]
    fn test_public_url_custom_endpoint_is_path_style() {
        let store = test_store(Some("http://localhost:9000/"), None);
        assert_eq!(
            store.public_url("uploads/1-a.png"),
            "http://localhost:9000/listings/uploads/1-a.png"
        );
    }

    #[test]
    fn test_public_url_prefers_configured_base() {
        let store = test_store(Some("http://localhost:9000"), Some("https://cdn.example.com/"));
        assert_eq!(
            store.public_url("uploads/1-a.png"),
            "https://cdn.example.com/uploads/1-a.png"
        );
    }
}
