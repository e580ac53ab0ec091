use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, RemoteObject};
use crate::error::CatalogError;
use crate::recovery::config::RecoveryConfig;

/// Catalog backed by an `object_store` S3 client. Tests run the same code
/// over an in-memory store via [`S3Catalog::with_store`].
pub struct S3Catalog {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    page_size: usize,
}

impl S3Catalog {
    pub fn new(config: &RecoveryConfig) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.store.bucket)
            .with_region(&config.store.region)
            .with_access_key_id(&config.store.access_key_id)
            .with_secret_access_key(&config.store.secret_access_key)
            .build()
            .with_context(|| format!("failed to open bucket {}", config.store.bucket))?;

        Ok(Self::with_store(
            Arc::new(store),
            &config.store.bucket,
            config.pipeline.pagination_size,
        ))
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: &str, page_size: usize) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl Catalog for S3Catalog {
    async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteObject>, CatalogError> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let trimmed = prefix.trim();
        let prefix_path = (!trimmed.is_empty()).then(|| ObjectPath::from(trimmed));

        let mut objects = Vec::new();
        let mut pages = self.store.list(prefix_path.as_ref()).chunks(self.page_size);
        while let Some(page) = pages.next().await {
            for meta in page {
                let meta = meta
                    .map_err(|err| CatalogError::transport("listing", &self.bucket, trimmed, err))?;
                objects.push(RemoteObject {
                    key: meta.location.to_string(),
                    size: meta.size,
                    last_modified: meta.last_modified,
                });
            }
        }
        Ok(objects)
    }

    async fn fetch(
        &self,
        key: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, CatalogError> {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        let result = match self.store.get(&ObjectPath::from(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(err) => {
                return Err(CatalogError::transport(
                    "downloading from",
                    &self.bucket,
                    key,
                    err,
                ));
            }
        };

        let bytes = result.bytes().await.map_err(|err| {
            CatalogError::transport("downloading from", &self.bucket, key, err)
        })?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CatalogError::local_io("downloading from", key, err))?;
        }
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|err| CatalogError::local_io("downloading from", key, err))?;
        Ok(true)
    }

    async fn store(
        &self,
        key: &str,
        source: &Path,
        _cancel: &CancellationToken,
    ) -> Result<bool, CatalogError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|err| CatalogError::local_io("uploading to", key, err))?;

        self.store
            .put(&ObjectPath::from(key), PutPayload::from(bytes))
            .await
            .map_err(|err| CatalogError::transport("uploading to", &self.bucket, key, err))?;
        Ok(true)
    }

    async fn remove(&self, key: &str, _cancel: &CancellationToken) -> Result<bool, CatalogError> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(CatalogError::transport(
                "deleting from",
                &self.bucket,
                key,
                err,
            )),
        }
    }
}
