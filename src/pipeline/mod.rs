//! Staged record pipeline: Extractor → Transformer → Uploader.
//!
//! Each stage drains completely into the staging area before the next one
//! starts. Stages communicate only through [`StagingStore`](crate::storage::StagingStore)
//! namespaces, never through memory.

pub mod extractor;
pub mod progress;
pub mod transformer;
pub mod uploader;

pub use extractor::{extract, ExtractionSummary, PAGE_WINDOW};
pub use progress::{ProgressSnapshot, RunProgress, Stage};
pub use transformer::{transform, Operation, OperationKind, TransformSummary};
pub use uploader::{upload, ChunkOutcome, UploadReport, UploadStatus};
