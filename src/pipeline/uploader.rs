//! Upload: push transformed chunks to the destination, one batch at a time.
//!
//! Chunks go out in ascending key order with a single write in flight. A
//! batch that ultimately fails stalls the upload at that chunk: later chunks
//! are not attempted and the staging area is left untouched for inspection.

use std::sync::atomic::Ordering;

use super::progress::RunProgress;
use crate::client::DestinationIndex;
use crate::error::{FerryError, Result};
use crate::models::{ChunkIndex, Record};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::storage::{Namespace, StagingStore};

/// Result of one batch write
#[derive(Debug)]
pub enum ChunkOutcome {
    Pushed { records: usize },
    RetryableError(FerryError),
    FatalError(FerryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// Every transformed chunk was acknowledged
    Completed,
    /// Upload stopped at `chunk`; it and every later chunk were not written
    Stalled { chunk: ChunkIndex, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub status: UploadStatus,
    pub chunks_pushed: usize,
    pub records_pushed: usize,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.status == UploadStatus::Completed
    }
}

async fn push_chunk(destination: &dyn DestinationIndex, records: &[Record]) -> ChunkOutcome {
    match destination.add_objects(records).await {
        Ok(()) => ChunkOutcome::Pushed {
            records: records.len(),
        },
        Err(e) if e.is_retryable() => ChunkOutcome::RetryableError(e),
        Err(e) => ChunkOutcome::FatalError(e),
    }
}

/// Push every transformed chunk to `destination`.
///
/// Staging read errors are returned as `Err`. Destination failures are not:
/// they end the upload with [`UploadStatus::Stalled`].
pub async fn upload(
    staging: &StagingStore,
    destination: &dyn DestinationIndex,
    policy: &RetryPolicy,
    progress: &RunProgress,
) -> Result<UploadReport> {
    tracing::info!("Uploading records to {}", destination.name());

    let mut chunks_pushed = 0usize;
    let mut records_pushed = 0usize;

    for key in staging.list_sorted(Namespace::Transformed).await? {
        let records = staging.get(Namespace::Transformed, key).await?;
        let mut failures = 0u32;

        loop {
            let error = match push_chunk(destination, &records).await {
                ChunkOutcome::Pushed { records } => {
                    chunks_pushed += 1;
                    records_pushed += records;
                    progress.chunks_pushed.store(chunks_pushed, Ordering::Relaxed);
                    progress.records_pushed.store(records_pushed, Ordering::Relaxed);
                    tracing::info!(
                        chunk = key,
                        records = records_pushed,
                        "Pushed {} records...",
                        records_pushed
                    );
                    break;
                }
                ChunkOutcome::RetryableError(e) => {
                    failures += 1;
                    match policy.decide(failures, true) {
                        RetryDecision::Retry(delay) => {
                            tracing::warn!(
                                chunk = key,
                                attempt = failures,
                                "Batch write failed, retrying in {:?}: {}",
                                delay,
                                e
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        RetryDecision::GiveUp => e,
                    }
                }
                ChunkOutcome::FatalError(e) => e,
            };

            tracing::error!(
                chunk = key,
                records_pushed,
                staging = %staging.root().display(),
                "Upload stalled at chunk {}: {}",
                key,
                error
            );
            return Ok(UploadReport {
                status: UploadStatus::Stalled {
                    chunk: key,
                    error: error.to_string(),
                },
                chunks_pushed,
                records_pushed,
            });
        }
    }

    Ok(UploadReport {
        status: UploadStatus::Completed,
        chunks_pushed,
        records_pushed,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
