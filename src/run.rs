//! Run controller: composes extraction, transformation and upload into one
//! of the four public operations, and owns the staging area's lifecycle.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::client::{AlgoliaIndex, DestinationIndex, SourceIndex};
use crate::config::{FerryConfig, RunConfig, SettingsTiming};
use crate::error::Result;
use crate::models::Record;
use crate::pipeline::{
    extract, transform, upload, ExtractionSummary, Operation, OperationKind, RunProgress, Stage,
    TransformSummary, UploadReport,
};
use crate::retry::RetryPolicy;
use crate::settings::replicate_settings_logged;
use crate::storage::StagingStore;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Soft floor on extracted records
    pub limit: Option<usize>,
    pub request_options: Map<String, Value>,
    pub copy_settings: bool,
    pub settings_timing: SettingsTiming,
    pub retry: RetryPolicy,
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            limit: config.limit,
            request_options: config.request_options.clone(),
            copy_settings: config.copy_settings,
            settings_timing: config.settings_timing,
            retry: RetryPolicy::new(config.upload_retries, config.retry_backoff()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutcome {
    Skipped,
    Copied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation: OperationKind,
    pub extraction: ExtractionSummary,
    pub transform: TransformSummary,
    pub upload: UploadReport,
    pub settings: SettingsOutcome,
}

impl RunReport {
    /// Every transformed record reached the destination
    pub fn is_complete(&self) -> bool {
        self.upload.is_complete()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replication {
    Concurrent,
    AfterUpload,
}

type PipelineOutput = (ExtractionSummary, TransformSummary, UploadReport);

/// One source/destination pair plus a staging area. Each public operation
/// performs a full run: fresh staging, extract, transform, upload, purge.
pub struct Migration {
    source: Arc<dyn SourceIndex>,
    destination: Arc<dyn DestinationIndex>,
    staging: StagingStore,
    options: RunOptions,
    progress: Arc<RunProgress>,
}

impl Migration {
    /// Build HTTP clients for both sides of `config`.
    pub fn new(config: &FerryConfig) -> Result<Self> {
        config.validate()?;
        let source = AlgoliaIndex::new(&config.source, &config.headers)?;
        let destination = AlgoliaIndex::new(&config.destination, &config.headers)?;
        Ok(Self::with_indexes(
            Arc::new(source),
            Arc::new(destination),
            StagingStore::new(&config.staging.dir),
            RunOptions::from(&config.run),
        ))
    }

    pub fn with_indexes(
        source: Arc<dyn SourceIndex>,
        destination: Arc<dyn DestinationIndex>,
        staging: StagingStore,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            destination,
            staging,
            options,
            progress: Arc::new(RunProgress::new()),
        }
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Counters of the current (or last) run
    pub fn progress(&self) -> Arc<RunProgress> {
        self.progress.clone()
    }

    /// Transform every record with `f`.
    pub async fn map(
        &self,
        f: impl Fn(Record) -> Record + Send + Sync + 'static,
    ) -> Result<RunReport> {
        self.run(Operation::map(f)).await
    }

    /// Chunk-local reduction: `f` folds the records of each staged chunk
    /// separately, starting from the chunk's first record. It never sees the
    /// dataset as a whole; a global aggregate needs a second pass over the
    /// destination.
    pub async fn reduce(
        &self,
        f: impl Fn(Record, Record) -> Record + Send + Sync + 'static,
    ) -> Result<RunReport> {
        self.run(Operation::chunk_reduce(f)).await
    }

    /// Keep only the records matching `predicate`.
    pub async fn filter(
        &self,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Result<RunReport> {
        self.run(Operation::filter(predicate)).await
    }

    /// Duplicate every record unchanged.
    pub async fn copy(&self) -> Result<RunReport> {
        self.run(Operation::Copy).await
    }

    /// Copy index settings only, outside of any run.
    pub async fn copy_settings(&self) -> Result<()> {
        crate::settings::replicate_settings(self.source.as_ref(), self.destination.as_ref()).await
    }

    fn replication(&self, kind: OperationKind) -> Option<Replication> {
        if !self.options.copy_settings {
            return None;
        }
        Some(match self.options.settings_timing {
            SettingsTiming::Concurrent => Replication::Concurrent,
            SettingsTiming::AfterUpload => Replication::AfterUpload,
            SettingsTiming::PerOperation if kind == OperationKind::Map => Replication::AfterUpload,
            SettingsTiming::PerOperation => Replication::Concurrent,
        })
    }

    pub async fn run(&self, operation: Operation) -> Result<RunReport> {
        let kind = operation.kind();
        let replication = self.replication(kind);
        self.progress.reset();

        tracing::info!(
            operation = kind.as_str(),
            source = self.source.name(),
            destination = self.destination.name(),
            "Starting {} run",
            kind.as_str()
        );

        let concurrent = (replication == Some(Replication::Concurrent)).then(|| {
            let source = self.source.clone();
            let destination = self.destination.clone();
            tokio::spawn(async move {
                replicate_settings_logged(source.as_ref(), destination.as_ref()).await
            })
        });

        let result = self.run_pipeline(&operation).await;
        if let Err(ref e) = result {
            self.progress.set_stage(Stage::Failed);
            tracing::error!("{} run failed: {}", kind.as_str(), e);
        }

        let settings = match (replication, concurrent) {
            (Some(Replication::Concurrent), Some(handle)) => match handle.await {
                Ok(true) => SettingsOutcome::Copied,
                Ok(false) => SettingsOutcome::Failed,
                Err(e) => {
                    tracing::error!("Settings task panicked: {}", e);
                    SettingsOutcome::Failed
                }
            },
            // A stalled upload is not terminal: the destination stays unconfigured.
            (Some(Replication::AfterUpload), _)
                if matches!(&result, Ok((_, _, report)) if report.is_complete()) =>
            {
                let (source, destination) = (self.source.as_ref(), self.destination.as_ref());
                if replicate_settings_logged(source, destination).await {
                    SettingsOutcome::Copied
                } else {
                    SettingsOutcome::Failed
                }
            }
            _ => SettingsOutcome::Skipped,
        };

        let (extraction, transform, upload) = result?;
        Ok(RunReport {
            operation: kind,
            extraction,
            transform,
            upload,
            settings,
        })
    }

    async fn run_pipeline(&self, operation: &Operation) -> Result<PipelineOutput> {
        self.staging.create().await?;

        self.progress.set_stage(Stage::Extracting);
        let extraction = extract(
            self.source.as_ref(),
            &self.options.request_options,
            &self.staging,
            self.options.limit,
            &self.progress,
        )
        .await?;

        self.progress.set_stage(Stage::Transforming);
        let transformed = transform(&self.staging, operation, &self.progress).await?;

        self.progress.set_stage(Stage::Uploading);
        let report = upload(
            &self.staging,
            self.destination.as_ref(),
            &self.options.retry,
            &self.progress,
        )
        .await?;

        if report.is_complete() {
            self.staging.purge_all().await?;
            self.progress.set_stage(Stage::Done);
            tracing::info!(records = report.records_pushed, "All done!");
        } else {
            self.progress.set_stage(Stage::Stalled);
        }

        Ok((extraction, transformed, report))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
