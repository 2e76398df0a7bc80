use anyhow::bail;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object store configuration
    pub s3: S3Config,
    /// Upload authorization configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3-compatible object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket uploads are written into
    pub bucket: String,
    /// Region (or region identifier for S3-compatible providers)
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, R2, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key; absence is a startup failure, never a per-request one
    pub access_key_id: String,
    /// Static secret key
    pub secret_access_key: String,
    /// Base URL objects are publicly retrievable under (CDN or bucket website).
    /// Falls back to a provider-derived URL when unset.
    pub public_base_url: Option<String>,
    /// Presigned upload URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Which kind of upload credential the service issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Clients PUT directly to the store via a presigned URL
    Presigned,
    /// Clients PUT to this service, which relays the bytes to the store
    Relay,
}

/// Upload authorization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Credential variant to issue
    #[serde(default)]
    pub mode: UploadMode,
    /// Fixed key prefix; derived keys are `{prefix}/{millis}-{filename}`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// HMAC secret for relay upload tokens; required in relay mode
    pub relay_token_secret: Option<String>,
    /// Relay token validity window in seconds
    #[serde(default = "default_relay_token_ttl_secs")]
    pub relay_token_ttl_secs: u64,
}

/// API configuration for the upload endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Externally reachable base URL, used to build relay upload URLs
    pub external_url: Option<String>,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_key_prefix() -> String {
    "uploads".to_string()
}

fn default_relay_token_ttl_secs() -> u64 {
    3600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "upload-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/upload").required(false))
            .add_source(config::File::with_name("/etc/upload-service/upload").required(false))
            // Override with environment variables
            // UPLOAD__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation run once at startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            bail!("s3.bucket must not be empty");
        }
        if self.s3.access_key_id.trim().is_empty() || self.s3.secret_access_key.trim().is_empty() {
            bail!("s3.access_key_id and s3.secret_access_key must not be empty");
        }
        if self.upload.mode == UploadMode::Relay
            && self
                .upload
                .relay_token_secret
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            bail!("upload.relay_token_secret is required when upload.mode is \"relay\"");
        }
        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Get relay token validity window as Duration
    pub fn relay_token_ttl(&self) -> Duration {
        Duration::from_secs(self.upload.relay_token_ttl_secs)
    }

    /// Base URL relay upload URLs are issued under
    pub fn external_url(&self) -> String {
        self.api
            .external_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.api.host, self.api.port))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadMode {
    fn default() -> Self {
        UploadMode::Presigned
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::default(),
            key_prefix: default_key_prefix(),
            relay_token_secret: None,
            relay_token_ttl_secs: default_relay_token_ttl_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            external_url: None,
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            s3: S3Config {
                bucket: "listings".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
                access_key_id: "AKIATEST".to_string(),
                secret_access_key: "secret".to_string(),
                public_base_url: None,
                presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
                multipart_threshold_bytes: default_multipart_threshold(),
                part_size_bytes: default_part_size(),
            },
            upload: UploadConfig::default(),
            api: ApiConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
        assert_eq!(default_relay_token_ttl_secs(), 3600);
        assert_eq!(default_key_prefix(), "uploads");
        assert_eq!(default_api_port(), 8080);
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_blank_credentials_fail_validation() {
        let mut config = test_config();
        config.s3.secret_access_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_mode_requires_token_secret() {
        let mut config = test_config();
        config.upload.mode = UploadMode::Relay;
        assert!(config.validate().is_err());

        config.upload.relay_token_secret = Some("relay-secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_external_url_falls_back_to_listen_address() {
        let mut config = test_config();
        assert_eq!(config.external_url(), "http://0.0.0.0:8080");

        config.api.external_url = Some("https://uploads.example.com".to_string());
        assert_eq!(config.external_url(), "https://uploads.example.com");
    }

    #[test]
    fn test_upload_mode_deserializes_lowercase() {
        let mode: UploadMode = serde_json::from_str("\"relay\"").unwrap();
        assert_eq!(mode, UploadMode::Relay);
        let mode: UploadMode = serde_json::from_str("\"presigned\"").unwrap();
        assert_eq!(mode, UploadMode::Presigned);
    }
}
