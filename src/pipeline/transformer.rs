//! Transformation: apply the run's operation to every raw chunk.
//!
//! Chunks are processed one at a time and in isolation. Chunk `i` of the raw
//! namespace becomes chunk `i` of the transformed namespace; a chunk whose
//! result is empty is not written at all, so the transformed namespace may
//! have gaps but never holds an empty chunk.

use std::sync::atomic::Ordering;

use serde_json::Value;

use super::progress::RunProgress;
use crate::error::Result;
use crate::models::Record;
use crate::storage::{Namespace, StagingStore};

pub type MapFn = Box<dyn Fn(Record) -> Record + Send + Sync>;
pub type FilterFn = Box<dyn Fn(&Record) -> bool + Send + Sync>;
pub type ReduceFn = Box<dyn Fn(Record, Record) -> Record + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Map,
    Filter,
    Reduce,
    Copy,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Reduce => "reduce",
            Self::Copy => "copy",
        }
    }

    fn gerund(&self) -> &'static str {
        match self {
            Self::Map => "Mapping",
            Self::Filter => "Filtering",
            Self::Reduce => "Reducing",
            Self::Copy => "Copying",
        }
    }

    fn past(&self) -> &'static str {
        match self {
            Self::Map => "Mapped",
            Self::Filter => "Filtered",
            Self::Reduce => "Reduced",
            Self::Copy => "Copied",
        }
    }
}

/// The data operation of a run
pub enum Operation {
    /// One output record per input record
    Map(MapFn),
    /// Keep the records matching the predicate
    Filter(FilterFn),
    /// Fold the records of ONE chunk, starting from its first record.
    ///
    /// This is not a dataset-wide reduction: every chunk is folded on its
    /// own and contributes its own output. A fold result that is a JSON array
    /// is spread into the chunk's output; any other value is one record.
    ChunkReduce(ReduceFn),
    /// Records pass through unchanged
    Copy,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Operation").field(&self.kind()).finish()
    }
}

impl Operation {
    pub fn map(f: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        Self::Map(Box::new(f))
    }

    pub fn filter(f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Self::Filter(Box::new(f))
    }

    pub fn chunk_reduce(f: impl Fn(Record, Record) -> Record + Send + Sync + 'static) -> Self {
        Self::ChunkReduce(Box::new(f))
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Map(_) => OperationKind::Map,
            Self::Filter(_) => OperationKind::Filter,
            Self::ChunkReduce(_) => OperationKind::Reduce,
            Self::Copy => OperationKind::Copy,
        }
    }

    /// Apply the operation to the records of a single chunk.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        match self {
            Self::Map(f) => records.into_iter().map(f).collect(),
            Self::Filter(f) => records.into_iter().filter(|r| f(r)).collect(),
            Self::ChunkReduce(f) => {
                let mut records = records.into_iter();
                let Some(first) = records.next() else {
                    return Vec::new();
                };
                match records.fold(first, |acc, record| f(acc, record)) {
                    Value::Array(items) => items,
                    other => vec![other],
                }
            }
            Self::Copy => records,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub chunks_read: usize,
    pub chunks_written: usize,
    pub records: usize,
}

/// Transform every raw chunk into the transformed namespace.
pub async fn transform(
    staging: &StagingStore,
    operation: &Operation,
    progress: &RunProgress,
) -> Result<TransformSummary> {
    let kind = operation.kind();
    tracing::info!("{} records", kind.gerund());

    let mut summary = TransformSummary::default();

    for key in staging.list_sorted(Namespace::Raw).await? {
        let records = staging.get(Namespace::Raw, key).await?;
        summary.chunks_read += 1;

        let output = operation.apply(records);
        if output.is_empty() {
            tracing::debug!(chunk = key, "Chunk produced no records, skipped");
            continue;
        }

        staging.put(Namespace::Transformed, key, &output).await?;
        summary.chunks_written += 1;
        summary.records += output.len();

        progress
            .records_transformed
            .store(summary.records, Ordering::Relaxed);
        progress
            .transformed_chunks
            .store(summary.chunks_written, Ordering::Relaxed);
        tracing::info!(
            chunk = key,
            records = summary.records,
            "{} {} records...",
            kind.past(),
            summary.records
        );
    }

    Ok(summary)
}

// =============================================================================
// Unit Tests
// =============================================================================
