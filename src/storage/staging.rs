//! On-disk chunk staging.
//!
//! ```text
//! <root>/
//! ├── raw/
//! │   ├── chunk-0.json
//! │   └── chunk-1.json
//! └── transformed/
//!     └── chunk-0.json
//! ```
//!
//! Each chunk is a JSON array of records. A chunk file is written to a
//! temporary file in the same directory and renamed into place, so readers
//! see either the whole chunk or nothing.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{FerryError, Result};
use crate::models::{ChunkIndex, Record};

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Records exactly as pulled from the source
    Raw,
    /// Records after the run's operation
    Transformed,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Transformed => "transformed",
        }
    }
}

/// Chunk counts left in a staging directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingSummary {
    pub raw_chunks: usize,
    pub raw_bytes: u64,
    pub transformed_chunks: usize,
    pub transformed_bytes: u64,
}

impl StagingSummary {
    pub fn is_empty(&self) -> bool {
        self.raw_chunks == 0 && self.transformed_chunks == 0
    }
}

#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    pub fn chunk_path(&self, namespace: Namespace, index: ChunkIndex) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{CHUNK_PREFIX}{index}{CHUNK_SUFFIX}"))
    }

    /// Start from an empty staging area: leftovers of earlier runs are removed.
    pub async fn create(&self) -> Result<()> {
        self.purge_all().await?;
        for namespace in [Namespace::Raw, Namespace::Transformed] {
            let dir = self.namespace_dir(namespace);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| FerryError::staging_io(&dir, e))?;
        }
        tracing::debug!(root = %self.root.display(), "Staging area created");
        Ok(())
    }

    /// Persist `records` as chunk `index`, replacing any previous content.
    pub async fn put(
        &self,
        namespace: Namespace,
        index: ChunkIndex,
        records: &[Record],
    ) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        let path = self.chunk_path(namespace, index);
        let content = serde_json::to_vec(records)?;
        let bytes = content.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &content))
            .await
            .map_err(|e| FerryError::staging_io(&path, std::io::Error::other(e)))??;

        tracing::debug!(
            namespace = namespace.as_str(),
            chunk = index,
            records = records.len(),
            bytes,
            "Chunk written"
        );
        Ok(())
    }

    /// Keys present in `namespace`, in no particular order.
    pub async fn list(&self, namespace: Namespace) -> Result<Vec<ChunkIndex>> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FerryError::staging_io(&dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FerryError::staging_io(&dir, e))?
        {
            if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_name) {
                keys.push(index);
            }
        }
        Ok(keys)
    }

    /// Keys present in `namespace`, ascending.
    pub async fn list_sorted(&self, namespace: Namespace) -> Result<Vec<ChunkIndex>> {
        let mut keys = self.list(namespace).await?;
        keys.sort_unstable();
        Ok(keys)
    }

    pub async fn get(&self, namespace: Namespace, index: ChunkIndex) -> Result<Vec<Record>> {
        let path = self.chunk_path(namespace, index);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FerryError::ChunkNotFound {
                    namespace: namespace.as_str(),
                    index,
                })
            }
            Err(e) => return Err(FerryError::staging_io(&path, e)),
        };

        serde_json::from_slice(&content)
            .map_err(|source| FerryError::MalformedChunk { path, source })
    }

    pub async fn purge(&self, namespace: Namespace) -> Result<()> {
        remove_dir_if_exists(&self.namespace_dir(namespace)).await
    }

    /// Remove both namespaces, then the staging root if nothing else lives there.
    pub async fn purge_all(&self) -> Result<()> {
        self.purge(Namespace::Raw).await?;
        self.purge(Namespace::Transformed).await?;
        match tokio::fs::remove_dir(&self.root).await {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(FerryError::staging_io(&self.root, e)),
        }
    }

    pub async fn inspect(&self) -> Result<StagingSummary> {
        let (raw_chunks, raw_bytes) = self.namespace_usage(Namespace::Raw).await?;
        let (transformed_chunks, transformed_bytes) =
            self.namespace_usage(Namespace::Transformed).await?;
        Ok(StagingSummary {
            raw_chunks,
            raw_bytes,
            transformed_chunks,
            transformed_bytes,
        })
    }

    async fn namespace_usage(&self, namespace: Namespace) -> Result<(usize, u64)> {
        let keys = self.list(namespace).await?;
        let mut bytes = 0u64;
        for key in &keys {
            let path = self.chunk_path(namespace, *key);
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|e| FerryError::staging_io(&path, e))?;
            bytes += meta.len();
        }
        Ok((keys.len(), bytes))
    }
}

fn parse_chunk_name(name: &str) -> Option<ChunkIndex> {
    name.strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?
        .parse()
        .ok()
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| FerryError::staging_io(dir, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| FerryError::staging_io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| FerryError::staging_io(path, e.error))?;
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FerryError::staging_io(dir, e)),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_store() -> (StagingStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = StagingStore::new(temp_dir.path().join("staging"));
        store.create().await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp) = create_test_store().await;
        let records = vec![json!({"objectID": "1", "n": 1}), json!({"objectID": "2", "n": 2})];

        store.put(Namespace::Raw, 0, &records).await.unwrap();

        let loaded = store.get(Namespace::Raw, 0).await.unwrap();
        assert_eq!(loaded, records);
        assert!(store.chunk_path(Namespace::Raw, 0).ends_with("raw/chunk-0.json"));
    }

    #[tokio::test]
    async fn test_put_replaces_existing_chunk() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 3, &[json!(1), json!(2)]).await.unwrap();
        store.put(Namespace::Raw, 3, &[json!(9)]).await.unwrap();

        assert_eq!(store.get(Namespace::Raw, 3).await.unwrap(), vec![json!(9)]);
        assert_eq!(store.list(Namespace::Raw).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 0, &[json!("raw")]).await.unwrap();

        assert!(store.list(Namespace::Transformed).await.unwrap().is_empty());
        let err = store.get(Namespace::Transformed, 0).await.unwrap_err();
        assert!(matches!(
            err,
            FerryError::ChunkNotFound {
                namespace: "transformed",
                index: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_files() {
        let (store, temp) = create_test_store().await;
        for i in [2, 0, 10, 1] {
            store.put(Namespace::Raw, i, &[json!(i)]).await.unwrap();
        }
        let raw_dir = temp.path().join("staging").join("raw");
        std::fs::write(raw_dir.join("notes.txt"), "x").unwrap();
        std::fs::write(raw_dir.join("chunk-x.json"), "[]").unwrap();
        std::fs::write(raw_dir.join(".tmpA1b2"), "[").unwrap();

        assert_eq!(store.list_sorted(Namespace::Raw).await.unwrap(), vec![0, 1, 2, 10]);
    }

    #[tokio::test]
    async fn test_malformed_chunk() {
        let (store, _temp) = create_test_store().await;
        std::fs::write(store.chunk_path(Namespace::Raw, 0), "[{\"objectID\": ").unwrap();

        let err = store.get(Namespace::Raw, 0).await.unwrap_err();
        assert!(matches!(err, FerryError::MalformedChunk { .. }));
    }

    #[tokio::test]
    async fn test_create_wipes_leftovers() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 0, &[json!(1)]).await.unwrap();
        store.put(Namespace::Transformed, 0, &[json!(1)]).await.unwrap();

        store.create().await.unwrap();

        assert!(store.inspect().await.unwrap().is_empty());
        assert!(store.root().join("raw").is_dir());
        assert!(store.root().join("transformed").is_dir());
    }

    #[tokio::test]
    async fn test_purge_all() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 0, &[json!(1)]).await.unwrap();

        store.purge_all().await.unwrap();
        assert!(!store.root().exists());

        // Purging an absent staging area is not an error
        store.purge_all().await.unwrap();
        assert!(store.list(Namespace::Raw).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_all_keeps_foreign_files() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 0, &[json!(1)]).await.unwrap();
        store.put(Namespace::Transformed, 0, &[json!(1)]).await.unwrap();
        std::fs::write(store.root().join("ferry.toml"), "[run]\n").unwrap();

        store.purge_all().await.unwrap();

        assert!(!store.root().join("raw").exists());
        assert!(!store.root().join("transformed").exists());
        assert_eq!(
            std::fs::read_to_string(store.root().join("ferry.toml")).unwrap(),
            "[run]\n"
        );

        // create() clears namespaces only
        store.create().await.unwrap();
        assert!(store.root().join("ferry.toml").exists());
    }

    #[tokio::test]
    async fn test_inspect_counts_chunks() {
        let (store, _temp) = create_test_store().await;
        store.put(Namespace::Raw, 0, &[json!(1)]).await.unwrap();
        store.put(Namespace::Raw, 1, &[json!(2)]).await.unwrap();
        store.put(Namespace::Transformed, 0, &[json!(1)]).await.unwrap();

        let summary = store.inspect().await.unwrap();
        assert_eq!(summary.raw_chunks, 2);
        assert_eq!(summary.transformed_chunks, 1);
        assert_eq!(summary.raw_bytes, 6); // "[1]" + "[2]"
    }

    #[test]
    fn test_parse_chunk_name() {
        assert_eq!(parse_chunk_name("chunk-0.json"), Some(0));
        assert_eq!(parse_chunk_name("chunk-123.json"), Some(123));
        assert_eq!(parse_chunk_name("chunk-.json"), None);
        assert_eq!(parse_chunk_name("chunk-1.json.tmp"), None);
    }
}
