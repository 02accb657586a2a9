//! Extraction: drain the source cursor into raw chunks.
//!
//! Pages are accumulated in memory and flushed to the raw namespace once a
//! window of [`PAGE_WINDOW`] pages is full *and* one more page arrives, so a
//! flushed chunk normally holds `PAGE_WINDOW + 1` pages. The configured record
//! limit is checked against already-flushed records only, at window
//! boundaries: it is a soft floor, never a ceiling.

use futures::TryStreamExt;
use serde_json::{Map, Value};

use super::progress::RunProgress;
use crate::client::{PageStream, SourceIndex};
use crate::error::Result;
use crate::models::{ChunkIndex, Page, Record};
use crate::storage::{Namespace, StagingStore};

/// Minimum number of pages accumulated before a raw chunk is flushed
pub const PAGE_WINDOW: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Accumulating,
    Flushing,
    Stopped,
}

/// What to do after a page arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Accumulate,
    Flush,
    /// The limit was exceeded; the arriving page is discarded
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Raw chunks written, indices `0..chunks`
    pub chunks: u64,
    pub records: usize,
    /// The record limit ended extraction before the cursor was exhausted
    pub stopped_early: bool,
}

struct Extractor<'a> {
    staging: &'a StagingStore,
    progress: &'a RunProgress,
    limit: Option<usize>,
    state: ExtractorState,
    accumulator: Vec<Record>,
    pages_in_window: usize,
    chunk_index: ChunkIndex,
    flushed_records: usize,
}

impl<'a> Extractor<'a> {
    fn new(staging: &'a StagingStore, progress: &'a RunProgress, limit: Option<usize>) -> Self {
        Self {
            staging,
            progress,
            limit,
            state: ExtractorState::Accumulating,
            accumulator: Vec::new(),
            pages_in_window: 0,
            chunk_index: 0,
            flushed_records: 0,
        }
    }

    fn on_page(&mut self, page: Page) -> Step {
        debug_assert_eq!(self.state, ExtractorState::Accumulating);

        if self.pages_in_window < PAGE_WINDOW {
            self.accumulator.extend(page.hits);
            self.pages_in_window += 1;
            return Step::Accumulate;
        }

        if self.limit.is_some_and(|limit| self.flushed_records > limit) {
            self.state = ExtractorState::Stopped;
            return Step::Stop;
        }

        self.accumulator.extend(page.hits);
        self.state = ExtractorState::Flushing;
        Step::Flush
    }

    /// Persist the accumulator as the next raw chunk.
    async fn flush(&mut self) -> Result<()> {
        self.staging
            .put(Namespace::Raw, self.chunk_index, &self.accumulator)
            .await?;

        self.flushed_records += self.accumulator.len();
        self.chunk_index += 1;
        self.accumulator.clear();
        self.pages_in_window = 0;
        if self.state == ExtractorState::Flushing {
            self.state = ExtractorState::Accumulating;
        }

        self.progress
            .records_pulled
            .store(self.flushed_records, std::sync::atomic::Ordering::Relaxed);
        self.progress
            .raw_chunks
            .store(self.chunk_index as usize, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn run(mut self, mut pages: PageStream) -> Result<ExtractionSummary> {
        // A cursor error returns here; the in-flight accumulator is never written.
        while let Some(page) = pages.try_next().await? {
            match self.on_page(page) {
                Step::Accumulate => {}
                Step::Flush => {
                    self.flush().await?;
                    tracing::info!(
                        records = self.flushed_records,
                        chunk = self.chunk_index - 1,
                        "Pulled {} records...",
                        self.flushed_records
                    );
                }
                Step::Stop => break,
            }
        }
        drop(pages);

        let stopped_early = self.state == ExtractorState::Stopped;
        self.state = ExtractorState::Stopped;
        self.flush().await?;

        tracing::info!(
            records = self.flushed_records,
            chunks = self.chunk_index,
            stopped_early,
            "Finished pulling {} records",
            self.flushed_records
        );

        Ok(ExtractionSummary {
            chunks: self.chunk_index,
            records: self.flushed_records,
            stopped_early,
        })
    }
}

/// Pull every page of `source` into the raw namespace.
///
/// Extraction ends when the cursor is exhausted or, with a `limit`, at the
/// first window boundary where more than `limit` records were already
/// flushed. Either way the remaining accumulator becomes the last chunk,
/// even when empty.
pub async fn extract(
    source: &dyn SourceIndex,
    request_options: &Map<String, Value>,
    staging: &StagingStore,
    limit: Option<usize>,
    progress: &RunProgress,
) -> Result<ExtractionSummary> {
    tracing::info!("Fetching records from {}", source.name());
    let pages = source.browse(request_options);
    Extractor::new(staging, progress, limit).run(pages).await
}

// =============================================================================
// Unit Tests
// =============================================================================
