//! Search-index clients used as the source and destination of a run.
//!
//! The pipeline only talks to the [`SourceIndex`] and [`DestinationIndex`]
//! traits. [`http::AlgoliaIndex`] speaks the hosted REST API,
//! [`memory::MemoryIndex`] keeps everything in process.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{Page, Record, SettingsBlob};

pub use http::AlgoliaIndex;
pub use memory::MemoryIndex;

/// Finite, non-restartable sequence of pages. Dropping it stops the cursor.
pub type PageStream = BoxStream<'static, Result<Page>>;

#[async_trait]
pub trait SourceIndex: Send + Sync {
    /// Index name, for log lines
    fn name(&self) -> &str;

    /// Open a cursor over every record of the index. Pages are fetched
    /// lazily as the stream is polled. `request_options` are passed through
    /// to the underlying browse request.
    fn browse(&self, request_options: &Map<String, Value>) -> PageStream;

    async fn get_settings(&self) -> Result<SettingsBlob>;
}

#[async_trait]
pub trait DestinationIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Write one batch. Returns once the destination acknowledged it.
    async fn add_objects(&self, records: &[Record]) -> Result<()>;

    async fn set_settings(&self, settings: &SettingsBlob) -> Result<()>;
}
