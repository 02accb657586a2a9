//! Unified error type for ferry runs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FerryError {
    /// Paging through the source index failed. Fatal to the run.
    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Staging I/O error at {path}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk {index} not found in {namespace} staging")]
    ChunkNotFound { namespace: &'static str, index: u64 },

    #[error("Malformed chunk {path}: {source}")]
    MalformedChunk {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A destination batch write was rejected or never acknowledged.
    #[error("Destination write failed: {message}")]
    DestinationWrite { message: String, retryable: bool },

    #[error("Settings replication failed: {0}")]
    SettingsReplication(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FerryError>;

impl FerryError {
    pub(crate) fn staging_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StagingIo {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DestinationWrite { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_write_retryable_flag() {
        let err = FerryError::DestinationWrite {
            message: "503 Service Unavailable".into(),
            retryable: true,
        };
        assert!(err.is_retryable());

        let err = FerryError::DestinationWrite {
            message: "400 Bad Request".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_staging_errors_are_not_retryable() {
        let err = FerryError::staging_io(
            "/tmp/raw/chunk-0.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("chunk-0.json"));
    }
}
