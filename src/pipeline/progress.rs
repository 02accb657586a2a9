//! Run counters and stage, shared between the pipeline and its observers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Pipeline phase currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Extracting,
    Transforming,
    Uploading,
    Done,
    Stalled,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Stalled => "stalled",
            Self::Failed => "failed",
        }
    }
}

/// Lock-free run counters, readable while a run is in flight.
#[derive(Debug, Default)]
pub struct RunProgress {
    pub active: AtomicBool,
    stage: Mutex<Stage>,
    pub records_pulled: AtomicUsize,
    pub raw_chunks: AtomicUsize,
    pub records_transformed: AtomicUsize,
    pub transformed_chunks: AtomicUsize,
    pub records_pushed: AtomicUsize,
    pub chunks_pushed: AtomicUsize,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.active.store(true, Ordering::Relaxed);
        self.set_stage(Stage::Idle);
        self.records_pulled.store(0, Ordering::Relaxed);
        self.raw_chunks.store(0, Ordering::Relaxed);
        self.records_transformed.store(0, Ordering::Relaxed);
        self.transformed_chunks.store(0, Ordering::Relaxed);
        self.records_pushed.store(0, Ordering::Relaxed);
        self.chunks_pushed.store(0, Ordering::Relaxed);
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        if matches!(stage, Stage::Done | Stage::Stalled | Stage::Failed) {
            self.active.store(false, Ordering::Relaxed);
        }
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            stage: self.stage(),
            records_pulled: self.records_pulled.load(Ordering::Relaxed),
            raw_chunks: self.raw_chunks.load(Ordering::Relaxed),
            records_transformed: self.records_transformed.load(Ordering::Relaxed),
            transformed_chunks: self.transformed_chunks.load(Ordering::Relaxed),
            records_pushed: self.records_pushed.load(Ordering::Relaxed),
            chunks_pushed: self.chunks_pushed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub stage: Stage,
    pub records_pulled: usize,
    pub raw_chunks: usize,
    pub records_transformed: usize,
    pub transformed_chunks: usize,
    pub records_pushed: usize,
    pub chunks_pushed: usize,
}
