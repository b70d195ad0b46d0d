//! Destination provisioning for sinks.
//!
//! Sinks try to create their container (bucket, directory) on the first cycle
//! instead of checking first: one request either way. "Already exists" is the
//! normal answer after the first run. "Access denied" is also tolerated: the
//! credentials may be allowed to write objects without being allowed to create
//! buckets, so the container is assumed to be provisioned out of band and is
//! not verified.

use crate::config::StorageConfig;
use crate::error::SinkError;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

const S3_CODE_ALREADY_OWNED: &str = "BucketAlreadyOwnedByYou";
const S3_CODE_ALREADY_EXISTS: &str = "BucketAlreadyExists";
const S3_CODE_ACCESS_DENIED: &str = "AccessDenied";

/// Provisioning failure reported by a [`ContainerProvisioner`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProvisionError {
    /// The container already exists
    #[error("container already exists")]
    AlreadyExists,
    /// The caller may not create the container
    #[error("access denied")]
    AccessDenied,
    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// How a container came to be usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Newly created
    Created,
    /// Already present
    AlreadyExists,
    /// Creation was denied; assumed to exist
    AssumedProvisioned,
}

/// Create or verify a sink destination.
#[async_trait]
pub trait ContainerProvisioner: Send + Sync {
    /// Container name for logs and errors.
    fn container(&self) -> &str;

    /// Make sure the container exists.
    async fn ensure_container(&self) -> std::result::Result<ProvisionOutcome, ProvisionError>;
}

/// Apply the tolerance rules to a provisioning result.
pub fn classify(
    container: &str,
    result: std::result::Result<ProvisionOutcome, ProvisionError>,
) -> std::result::Result<ProvisionOutcome, SinkError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(ProvisionError::AlreadyExists) => Ok(ProvisionOutcome::AlreadyExists),
        Err(ProvisionError::AccessDenied) => Ok(ProvisionOutcome::AssumedProvisioned),
        Err(ProvisionError::Other(message)) => Err(SinkError::Provisioning {
            destination: container.to_string(),
            message,
        }),
    }
}

/// Creates an S3 bucket with `CreateBucket`.
pub struct S3BucketProvisioner {
    client: S3Client,
    bucket: String,
    region: Option<String>,
}

impl S3BucketProvisioner {
    /// Wrap an existing client.
    pub fn new(client: S3Client, bucket: impl Into<String>, region: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.into().to_lowercase(),
            region,
        }
    }

    /// Build a client from storage configuration.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let (bucket, _) = config.s3_bucket_and_prefix().ok_or_else(|| {
            Error::InvalidConfiguration(format!("invalid S3 location: {}", config.location))
        })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(ref region) = config.aws_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.aws_access_key_id, &config.aws_secret_access_key)
        {
            debug!("Using explicit AWS credentials");
            let credentials = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "batchlog-explicit-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint) = config.s3_endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::new(
            S3Client::from_conf(s3_config.build()),
            bucket,
            config.aws_region.clone(),
        ))
    }
}

/// Map an S3 error code onto the provisioning taxonomy.
pub(crate) fn provision_error_from_s3_code(code: Option<&str>, message: String) -> ProvisionError {
    match code {
        Some(S3_CODE_ALREADY_OWNED) | Some(S3_CODE_ALREADY_EXISTS) => ProvisionError::AlreadyExists,
        Some(S3_CODE_ACCESS_DENIED) => ProvisionError::AccessDenied,
        _ => ProvisionError::Other(message),
    }
}

#[async_trait]
impl ContainerProvisioner for S3BucketProvisioner {
    fn container(&self) -> &str {
        &self.bucket
    }

    async fn ensure_container(&self) -> std::result::Result<ProvisionOutcome, ProvisionError> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);

        // us-east-1 rejects an explicit location constraint.
        if let Some(region) = self.region.as_deref().filter(|r| *r != "us-east-1") {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(ProvisionOutcome::Created),
            Err(err) => Err(provision_error_from_s3_code(
                err.code(),
                DisplayErrorContext(&err).to_string(),
            )),
        }
    }
}

/// Creates a local directory.
pub struct LocalDirProvisioner {
    path: PathBuf,
    display: String,
}

impl LocalDirProvisioner {
    /// Provision `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display = path.display().to_string();
        Self { path, display }
    }
}

#[async_trait]
impl ContainerProvisioner for LocalDirProvisioner {
    fn container(&self) -> &str {
        &self.display
    }

    async fn ensure_container(&self) -> std::result::Result<ProvisionOutcome, ProvisionError> {
        if tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ProvisionError::AlreadyExists);
        }

        match tokio::fs::create_dir_all(&self.path).await {
            Ok(()) => Ok(ProvisionOutcome::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ProvisionError::AlreadyExists),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(ProvisionError::AccessDenied),
            Err(e) => Err(ProvisionError::Other(e.to_string())),
        }
    }
}

/// For destinations provisioned out of band.
pub struct NoopProvisioner {
    container: String,
}

impl NoopProvisioner {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }
}

#[async_trait]
impl ContainerProvisioner for NoopProvisioner {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> std::result::Result<ProvisionOutcome, ProvisionError> {
        Ok(ProvisionOutcome::AlreadyExists)
    }
}
