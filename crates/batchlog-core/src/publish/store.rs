//! Object storage sink.
//!
//! Each batch becomes one text object at `<prefix><batch_name>`. Events are
//! rendered into the publish context as they arrive and uploaded in a single
//! put when the cycle ends.

use super::provision::{classify, ContainerProvisioner, LocalDirProvisioner, S3BucketProvisioner};
use super::{BufferPublisher, PublishContext};
use crate::config::Config;
use crate::error::SinkError;
use crate::event::{Layout, LoggingEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Normalize a key prefix so it is empty or ends with `/`.
///
/// Rejects leading `/`, empty segments and `..`.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Ok(String::new());
    }
    if prefix.starts_with('/') {
        return Err(Error::InvalidConfiguration(format!(
            "path prefix {:?} must not start with '/'",
            prefix
        )));
    }

    let trimmed = prefix.strip_suffix('/').unwrap_or(prefix);
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidConfiguration(format!(
                "path prefix {:?} contains an invalid segment",
                prefix
            )));
        }
    }

    Ok(format!("{}/", trimmed))
}

/// Publishes batches as text objects.
pub struct ObjectStorePublisher {
    store: Arc<dyn ObjectStore>,
    provisioner: Arc<dyn ContainerProvisioner>,
    prefix: String,
    layout: Layout,
    tags: Vec<String>,
    host_name: Option<String>,
    content_type_attributes: bool,
    container_ready: AtomicBool,
}

/// Builder for ObjectStorePublisher.
pub struct ObjectStorePublisherBuilder {
    store: Arc<dyn ObjectStore>,
    provisioner: Arc<dyn ContainerProvisioner>,
    prefix: String,
    layout: Layout,
    tags: Vec<String>,
    host_name: Option<String>,
    content_type_attributes: bool,
}

impl ObjectStorePublisherBuilder {
    /// Key prefix for every object.
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Layout for rendering events.
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Tags for every publish context.
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Host name for every publish context.
    pub fn host_name(mut self, host_name: Option<String>) -> Self {
        self.host_name = host_name;
        self
    }

    /// Send a Content-Type attribute with each object. Not every store
    /// supports attributes (the local filesystem does not).
    pub fn content_type_attributes(mut self, enabled: bool) -> Self {
        self.content_type_attributes = enabled;
        self
    }

    /// Build the publisher.
    pub fn build(self) -> Result<ObjectStorePublisher> {
        Ok(ObjectStorePublisher {
            store: self.store,
            provisioner: self.provisioner,
            prefix: normalize_prefix(&self.prefix)?,
            layout: self.layout,
            tags: self.tags,
            host_name: self.host_name,
            content_type_attributes: self.content_type_attributes,
            container_ready: AtomicBool::new(false),
        })
    }
}

impl ObjectStorePublisher {
    /// Start building a publisher over `store`.
    pub fn builder(
        store: Arc<dyn ObjectStore>,
        provisioner: Arc<dyn ContainerProvisioner>,
    ) -> ObjectStorePublisherBuilder {
        ObjectStorePublisherBuilder {
            store,
            provisioner,
            prefix: String::new(),
            layout: Layout::default(),
            tags: Vec::new(),
            host_name: None,
            content_type_attributes: false,
        }
    }

    /// Build the publisher described by configuration: S3 for `s3://`
    /// locations, a local directory otherwise.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let storage = &config.storage;

        let builder = if storage.is_s3() {
            let (_, prefix) = storage.s3_bucket_and_prefix().ok_or_else(|| {
                Error::InvalidConfiguration(format!("invalid S3 location: {}", storage.location))
            })?;
            let prefix = prefix.to_string();
            let store = Self::create_s3_store(config)?;
            let provisioner = Arc::new(S3BucketProvisioner::from_config(storage).await?);
            Self::builder(store, provisioner)
                .path_prefix(prefix)
                .content_type_attributes(true)
        } else {
            let store = Self::create_local_store(config)?;
            let provisioner = Arc::new(LocalDirProvisioner::new(&storage.location));
            Self::builder(store, provisioner)
        };

        let publisher = builder
            .layout(config.cache.layout)
            .tags(config.cache.tags.clone())
            .host_name(config.resolved_host_name())
            .build()?;

        info!(
            location = %storage.location,
            prefix = %publisher.prefix,
            layout = ?publisher.layout,
            "Object store publisher initialized"
        );

        Ok(publisher)
    }

    fn create_s3_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
        use object_store::aws::AmazonS3Builder;

        let storage = &config.storage;
        let (bucket, _) = storage.s3_bucket_and_prefix().ok_or_else(|| {
            Error::InvalidConfiguration(format!("invalid S3 location: {}", storage.location))
        })?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket.to_lowercase());

        if let Some(ref region) = storage.aws_region {
            builder = builder.with_region(region);
        }

        if let Some(ref access_key) = storage.aws_access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(ref secret_key) = storage.aws_secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(ref endpoint) = storage.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("S3 store: {}", e)))?;

        Ok(Arc::new(store))
    }

    fn create_local_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
        use object_store::local::LocalFileSystem;

        let path = std::path::Path::new(&config.storage.location);

        // The prefix store requires an existing directory.
        std::fs::create_dir_all(path)?;

        let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to create local file system store: {}", e))
        })?;

        Ok(Arc::new(store))
    }

    /// Normalized key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for a batch.
    pub fn object_key(&self, context: &PublishContext) -> String {
        format!("{}{}", self.prefix, context.batch_name)
    }

    async fn ensure_container(&self) -> Result<()> {
        if self.container_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let container = self.provisioner.container();
        let outcome = classify(container, self.provisioner.ensure_container().await)?;
        debug!(container = %container, outcome = ?outcome, "Destination provisioned");

        self.container_ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl BufferPublisher for ObjectStorePublisher {
    async fn start_publish(&self, cache_name: &str, batch_id: u64) -> Result<PublishContext> {
        self.ensure_container().await?;

        Ok(PublishContext::new(cache_name, batch_id)
            .with_layout(self.layout)
            .with_tags(self.tags.clone())
            .with_host_name(self.host_name.clone()))
    }

    async fn publish(&self, context: &mut PublishContext, _sequence: usize, event: &LoggingEvent) {
        context.append(event);
    }

    async fn end_publish(&self, context: PublishContext) -> Result<()> {
        let key = self.object_key(&context);
        let events = context.event_count();
        let data = Bytes::from(context.into_payload());
        let size_bytes = data.len();

        let mut options = PutOptions::default();
        if self.content_type_attributes {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, CONTENT_TYPE_TEXT.into());
            options.attributes = attributes;
        }

        // Content length is taken from the payload by the store.
        self.store
            .put_opts(&ObjectPath::from(key.as_str()), PutPayload::from_bytes(data), options)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Batch upload failed");
                SinkError::Transfer {
                    key: key.clone(),
                    message: e.to_string(),
                }
            })?;

        debug!(key = %key, events, size_bytes, "Batch uploaded");
        Ok(())
    }
}
