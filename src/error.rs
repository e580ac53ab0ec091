use thiserror::Error;

/// Failures at the object-store seam. "Object does not exist" is never an
/// error here: catalog operations report it as a soft `false` instead.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("error {op} object store! bucket: {bucket}, key: {key}, message: {message}")]
    Transport {
        op: &'static str,
        bucket: String,
        key: String,
        message: String,
    },
    #[error("error staging local file while {op}! key: {key}: {source}")]
    LocalIo {
        op: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub fn transport(
        op: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Transport {
            op,
            bucket: bucket.into(),
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn local_io(op: &'static str, key: impl Into<String>, source: std::io::Error) -> Self {
        Self::LocalIo {
            op,
            key: key.into(),
            source,
        }
    }
}
