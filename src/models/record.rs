use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A schema-less record as stored in a search index.
///
/// The pipeline never inspects record shape. The destination uses `objectID`
/// (when present) for upsert semantics.
pub type Record = Value;

/// Index-level configuration document, copied verbatim between indexes.
pub type SettingsBlob = Value;

/// Position of a chunk inside a staging namespace. Raw chunks are numbered
/// from 0 without gaps; transformed chunks keep the index of their raw chunk.
pub type ChunkIndex = u64;

/// One page delivered by a source cursor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub hits: Vec<Record>,
}

impl Page {
    pub fn new(hits: Vec<Record>) -> Self {
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
