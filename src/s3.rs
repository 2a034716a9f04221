// src/s3.rs
//
// The storage seam: everything the benchmark needs from an S3-compatible
// store, behind one async trait. Production uses the AWS SDK; tests use the
// in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, warn};

use crate::config::S3Configuration;

/// Key and size of one stored object, as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// The S3 surface the benchmark consumes.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Creates a bucket. A bucket that already exists counts as success.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;
    /// Empties and deletes a bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
    /// Uploads an object in a single part.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
    /// Streams an object to a sink and returns the number of bytes received.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<u64>;
    /// Lists all objects under the prefix, following pagination to the end.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// S3 access through the AWS SDK.
pub struct S3Backend {
    client: aws_sdk_s3::Client,
}

impl S3Backend {
    /// Builds a client for the given endpoint. Retries are disabled so every
    /// measured operation maps to exactly one request.
    pub async fn connect(config: &S3Configuration) -> Result<Self> {
        if config.skip_ssl_verify {
            warn!(
                "skipSSLverify is set, but certificate verification cannot be disabled \
                 with this client - continuing with verification enabled"
            );
        }

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "gosbench",
        );

        let mut timeouts = TimeoutConfig::builder();
        if !config.timeout.is_zero() {
            timeouts = timeouts.operation_timeout(config.timeout.as_std());
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts.build())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(config.endpoint.clone())
            .force_path_style(config.use_path_style)
            .build();

        debug!(endpoint = %config.endpoint, region = %config.region, "S3 client ready");
        Ok(S3Backend {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        })
    }
}

/// Builds the measured and housekeeping clients for one worker. They are
/// constructed independently so preparation and cleanup traffic does not
/// share connections with measured traffic.
pub async fn connect_pair(
    config: &S3Configuration,
) -> Result<(Arc<dyn ObjectBackend>, Arc<dyn ObjectBackend>)> {
    let svc = S3Backend::connect(config)
        .await
        .context("building the measured S3 client")?;
    let housekeeping = S3Backend::connect(config)
        .await
        .context("building the housekeeping S3 client")?;
    Ok((Arc::new(svc), Arc::new(housekeeping)))
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_bucket_already_exists()
                    || service_err.is_bucket_already_owned_by_you()
                {
                    return Ok(());
                }
                Err(anyhow::Error::new(service_err)
                    .context(format!("creating bucket {bucket}")))
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let contents = self.list_objects(bucket, "").await?;
        for batch in contents.chunks(1000) {
            let mut objects = Vec::with_capacity(batch.len());
            for info in batch {
                objects.push(
                    ObjectIdentifier::builder()
                        .key(info.key.clone())
                        .build()
                        .context("building delete identifier")?,
                );
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .context("building batch delete")?;
            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .with_context(|| format!("emptying bucket {bucket}"))?;
        }
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("deleting bucket {bucket}"))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("uploading object {key} to bucket {bucket}"))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<u64> {
        let mut object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("downloading object {key} from bucket {bucket}"))?;
        let mut received = 0u64;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("streaming object {key} from bucket {bucket}"))?
        {
            received += chunk.len() as u64;
        }
        Ok(received)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut contents = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("listing bucket {bucket}"))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                contents.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }
        }
        Ok(contents)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("deleting object {key} from bucket {bucket}"))?;
        Ok(())
    }
}

/// An in-process backend tracking bucket and object state, for exercising the
/// queue builder and executor without a live endpoint. Object bodies are not
/// retained; only their sizes matter to the benchmark.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buckets: Mutex<HashMap<String, BTreeMap<String, u64>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains_key(bucket)
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.lock().unwrap().remove(bucket).is_none() {
            bail!("bucket {bucket} does not exist");
        }
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get_mut(bucket) else {
            bail!("bucket {bucket} does not exist");
        };
        objects.insert(key.to_string(), body.len() as u64);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<u64> {
        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            bail!("bucket {bucket} does not exist");
        };
        match objects.get(key) {
            Some(size) => Ok(*size),
            None => bail!("object {key} does not exist in bucket {bucket}"),
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            bail!("bucket {bucket} does not exist");
        };
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, size)| ObjectInfo {
                key: key.clone(),
                size: *size,
            })
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get_mut(bucket) else {
            bail!("bucket {bucket} does not exist");
        };
        objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_backend_tracks_objects() {
        let backend = InMemoryBackend::new();
        backend.create_bucket("bench-0").await.unwrap();
        backend.create_bucket("bench-0").await.unwrap();

        backend
            .put_object("bench-0", "obj0", vec![0u8; 128])
            .await
            .unwrap();
        assert_eq!(backend.get_object("bench-0", "obj0").await.unwrap(), 128);

        let listed = backend.list_objects("bench-0", "obj").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "obj0");
        assert_eq!(listed[0].size, 128);
        assert!(backend.list_objects("bench-0", "other").await.unwrap().is_empty());

        backend.delete_object("bench-0", "obj0").await.unwrap();
        assert_eq!(backend.object_count("bench-0"), 0);

        backend.delete_bucket("bench-0").await.unwrap();
        assert!(!backend.bucket_exists("bench-0"));
        assert!(backend.delete_bucket("bench-0").await.is_err());
    }

    #[tokio::test]
    async fn in_memory_backend_rejects_missing_buckets() {
        let backend = InMemoryBackend::new();
        assert!(backend.put_object("nope", "k", vec![]).await.is_err());
        assert!(backend.get_object("nope", "k").await.is_err());
        assert!(backend.list_objects("nope", "").await.is_err());
    }
}
