//! ferry: staged record migration between two search indexes.
//!
//! A run pulls every record of a source index into on-disk chunks, applies one
//! operation (map, filter, chunk-local reduce or copy) chunk by chunk, and
//! pushes the result to a destination index one batch at a time.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod run;
pub mod settings;
pub mod storage;

pub use client::{AlgoliaIndex, DestinationIndex, MemoryIndex, SourceIndex};
pub use config::FerryConfig;
pub use error::{FerryError, Result};
pub use models::{Page, Record, SettingsBlob};
pub use pipeline::{Operation, RunProgress, Stage, UploadStatus};
pub use retry::RetryPolicy;
pub use run::{Migration, RunOptions, RunReport, SettingsOutcome};
pub use storage::{Namespace, StagingStore};
