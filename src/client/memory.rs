//! In-process index, usable as both a source and a destination.
//!
//! Pages are cut from the stored records with a fixed page size. Browse and
//! write failures can be injected to exercise the pipeline's failure paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use super::{DestinationIndex, PageStream, SourceIndex};
use crate::error::{FerryError, Result};
use crate::models::{Page, Record, SettingsBlob};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    batches: Vec<Vec<Record>>,
    settings: SettingsBlob,
    /// Zero-based batch call that fails, and whether the failure is retryable
    fail_write: Option<(usize, bool)>,
    fail_write_times: usize,
    fail_browse_at_page: Option<usize>,
    fail_settings: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryIndex {
    name: String,
    page_size: usize,
    inner: Arc<Mutex<Inner>>,
    pages_served: Arc<AtomicUsize>,
    write_calls: Arc<AtomicUsize>,
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: 1000,
            inner: Arc::new(Mutex::new(Inner::default())),
            pages_served: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_records(name: impl Into<String>, records: Vec<Record>, page_size: usize) -> Self {
        let index = Self {
            page_size: page_size.max(1),
            ..Self::new(name)
        };
        index.lock().records = records;
        index
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_initial_settings(&self, settings: SettingsBlob) {
        self.lock().settings = settings;
    }

    /// Make batch call number `call` (zero-based) fail `times` times in a row.
    pub fn fail_write_at(&self, call: usize, times: usize, retryable: bool) {
        let mut inner = self.lock();
        inner.fail_write = Some((call, retryable));
        inner.fail_write_times = times;
    }

    /// Make the cursor fail instead of delivering page `page` (zero-based).
    pub fn fail_browse_at_page(&self, page: usize) {
        self.lock().fail_browse_at_page = Some(page);
    }

    pub fn fail_settings(&self) {
        self.lock().fail_settings = true;
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Acknowledged batches, in arrival order
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.lock().batches.clone()
    }

    pub fn settings(&self) -> SettingsBlob {
        self.lock().settings.clone()
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::Relaxed)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceIndex for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn browse(&self, _request_options: &Map<String, Value>) -> PageStream {
        let (pages, fail_at) = {
            let inner = self.lock();
            let pages: Vec<Page> = inner
                .records
                .chunks(self.page_size)
                .map(|hits| Page::new(hits.to_vec()))
                .collect();
            (pages, inner.fail_browse_at_page)
        };
        let served = self.pages_served.clone();

        stream::iter(pages.into_iter().enumerate())
            .map(move |(i, page)| {
                if fail_at == Some(i) {
                    return Err(FerryError::SourceFetch(format!("cursor failed at page {i}")));
                }
                served.fetch_add(1, Ordering::Relaxed);
                Ok(page)
            })
            .boxed()
    }

    async fn get_settings(&self) -> Result<SettingsBlob> {
        let inner = self.lock();
        if inner.fail_settings {
            return Err(FerryError::SettingsReplication(format!(
                "{}: settings unavailable",
                self.name
            )));
        }
        Ok(inner.settings.clone())
    }
}

#[async_trait]
impl DestinationIndex for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_objects(&self, records: &[Record]) -> Result<()> {
        let call = self.write_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        if let Some((fail_call, retryable)) = inner.fail_write {
            if fail_call == call && inner.fail_write_times > 0 {
                inner.fail_write_times -= 1;
                // The same logical batch is retried under the next call number.
                inner.fail_write = Some((call + 1, retryable));
                return Err(FerryError::DestinationWrite {
                    message: format!("{}: batch {} rejected", self.name, call),
                    retryable,
                });
            }
        }

        inner.records.extend(records.iter().cloned());
        inner.batches.push(records.to_vec());
        Ok(())
    }

    async fn set_settings(&self, settings: &SettingsBlob) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_settings {
            return Err(FerryError::SettingsReplication(format!(
                "{}: settings rejected",
                self.name
            )));
        }
        inner.settings = settings.clone();
        Ok(())
    }
}
