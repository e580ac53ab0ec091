pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::CatalogError;

pub use s3::S3Catalog;

/// One remote object as seen by a listing: just enough to decide whether a
/// local cached copy can be reused (size + timestamp, no content hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The remote object store, reduced to the four primitives the pipeline
/// needs. Every call takes the shared cancellation token; cancellation is
/// advisory and never interrupts an in-flight transfer.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List every object under `prefix`. An empty prefix lists the whole
    /// bucket. Returns an empty listing when the token is already raised.
    async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteObject>, CatalogError>;

    /// Download `key` into `dest`, creating parent directories as needed.
    /// `Ok(false)` means the object does not exist; that is a normal result,
    /// not an error.
    async fn fetch(
        &self,
        key: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, CatalogError>;

    /// Upload the local file at `source` under `key`.
    async fn store(
        &self,
        key: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, CatalogError>;

    /// Delete `key`. `Ok(false)` means there was nothing to delete.
    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool, CatalogError>;
}
