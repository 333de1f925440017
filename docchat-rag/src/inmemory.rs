//! In-memory vector store using cosine similarity, optionally backed by a
//! JSON snapshot on disk.
//!
//! [`InMemoryVectorStore`] keeps every chunk in a `BTreeMap` keyed by
//! insertion sequence behind a `tokio::sync::RwLock`, with a secondary index
//! from `document_id` to sequences so cascading deletes and document-scoped
//! searches never scan the whole collection. Searches share the read lock;
//! inserts, deletes and clears take the write lock for the mutation and the
//! snapshot write only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::document::{Chunk, DocumentSummary, MetadataFilter, SearchResult};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::vectorstore::{StoreStats, VectorStore};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct StoreState {
    /// Chunks keyed by insertion sequence.
    records: BTreeMap<u64, Chunk>,
    /// Chunk id → sequence.
    ids: HashMap<String, u64>,
    /// document_id → sequences of its chunks.
    by_document: HashMap<String, BTreeSet<u64>>,
    dimension: Option<usize>,
    next_seq: u64,
}

impl StoreState {
    fn add(&mut self, seq: u64, chunk: Chunk) {
        self.ids.insert(chunk.id.clone(), seq);
        self.by_document.entry(chunk.metadata.document_id.clone()).or_default().insert(seq);
        self.records.insert(seq, chunk);
    }

    fn remove(&mut self, seq: u64) -> Option<Chunk> {
        let chunk = self.records.remove(&seq)?;
        self.ids.remove(&chunk.id);
        if let Some(seqs) = self.by_document.get_mut(&chunk.metadata.document_id) {
            seqs.remove(&seq);
            if seqs.is_empty() {
                self.by_document.remove(&chunk.metadata.document_id);
            }
        }
        if self.records.is_empty() {
            self.dimension = None;
        }
        Some(chunk)
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RagError::IndexCorruption(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let mut state = StoreState::default();
        let mut max_seq = None;
        for record in snapshot.records {
            let dim = record.chunk.embedding.len();
            match state.dimension {
                Some(expected) if expected != dim => {
                    return Err(RagError::IndexCorruption(format!(
                        "chunk '{}' has dimension {dim}, expected {expected}",
                        record.chunk.id
                    )));
                }
                _ => state.dimension = Some(dim),
            }
            if state.ids.contains_key(&record.chunk.id) || state.records.contains_key(&record.seq)
            {
                return Err(RagError::IndexCorruption(format!(
                    "duplicate chunk record '{}'",
                    record.chunk.id
                )));
            }
            max_seq = max_seq.max(Some(record.seq));
            state.add(record.seq, record.chunk);
        }
        state.next_seq = snapshot.next_seq.max(max_seq.map_or(0, |s| s + 1));
        Ok(state)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_seq: u64,
    records: Vec<SnapshotRecord>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    seq: u64,
    chunk: Chunk,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    next_seq: u64,
    records: Vec<SnapshotRecordRef<'a>>,
}

#[derive(Serialize)]
struct SnapshotRecordRef<'a> {
    seq: u64,
    chunk: &'a Chunk,
}

/// An in-memory vector store using cosine similarity for search.
///
/// Created with [`new`](InMemoryVectorStore::new) it lives only in memory.
/// Created with [`open`](InMemoryVectorStore::open) every committed mutation
/// is written to a JSON snapshot (temporary file, then rename) before the
/// call returns; a failed write rolls the mutation back.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::open("data/index.json").await?;
/// store.insert(chunks).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryVectorStore {
    /// Create a new empty, non-persistent store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, loading the snapshot if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Persistence`] if the file cannot be read or its
    /// directory created, and [`RagError::IndexCorruption`] if the snapshot
    /// is malformed or internally inconsistent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    RagError::IndexCorruption(format!(
                        "failed to parse snapshot '{}': {e}",
                        path.display()
                    ))
                })?;
                StoreState::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                StoreState::default()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            chunk_count = state.records.len(),
            document_count = state.by_document.len(),
            "opened vector store"
        );
        Ok(Self { state: RwLock::new(state), snapshot_path: Some(path) })
    }

    /// Path of the snapshot file, if the store is persistent.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            next_seq: state.next_seq,
            records: state
                .records
                .iter()
                .map(|(seq, chunk)| SnapshotRecordRef { seq: *seq, chunk })
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| RagError::Persistence(format!("failed to serialize snapshot: {e}")))?;

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;

        // Validate the whole batch before touching the state.
        let mut expected = state.dimension;
        let mut batch_ids = BTreeSet::new();
        for chunk in &chunks {
            let dim = chunk.embedding.len();
            if dim == 0 {
                return Err(RagError::InvalidInput(format!(
                    "chunk '{}' has no embedding",
                    chunk.id
                )));
            }
            match expected {
                Some(expected) if expected != dim => {
                    return Err(RagError::DimensionMismatch { expected, actual: dim });
                }
                _ => expected = Some(dim),
            }
            if state.ids.contains_key(&chunk.id) || !batch_ids.insert(chunk.id.as_str()) {
                return Err(RagError::IndexCorruption(format!(
                    "duplicate chunk id '{}'",
                    chunk.id
                )));
            }
            if state.by_document.contains_key(&chunk.metadata.document_id) {
                return Err(RagError::InvalidInput(format!(
                    "document '{}' already exists",
                    chunk.metadata.document_id
                )));
            }
        }
        drop(batch_ids);

        let previous_dimension = state.dimension;
        let first_seq = state.next_seq;
        let count = chunks.len() as u64;
        state.dimension = expected;
        for (offset, chunk) in chunks.into_iter().enumerate() {
            state.add(first_seq + offset as u64, chunk);
        }
        state.next_seq = first_seq + count;

        if let Err(e) = self.persist(&state).await {
            error!(error = %e, "snapshot write failed, rolling back insert");
            for seq in first_seq..first_seq + count {
                state.remove(seq);
            }
            state.dimension = previous_dimension;
            state.next_seq = first_seq;
            return Err(e);
        }
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let guard = self.state.read().await;
        let state = &*guard;
        if top_k == 0 || state.records.is_empty() {
            return Ok(Vec::new());
        }
        match state.dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
            }
            _ => {}
        }

        // Candidates come out in insertion order; the stable sort below keeps
        // that order among equal scores.
        let candidates: Box<dyn Iterator<Item = &Chunk> + '_> =
            match filter.and_then(|f| f.document_id.as_ref()) {
                Some(document_id) => match state.by_document.get(document_id) {
                    Some(seqs) => Box::new(seqs.iter().filter_map(|seq| state.records.get(seq))),
                    None => return Ok(Vec::new()),
                },
                None => Box::new(state.records.values()),
            };

        let mut scored: Vec<(&Chunk, f32)> = candidates
            .filter(|chunk| filter.is_none_or(|f| f.matches(&chunk.metadata)))
            .map(|chunk| (chunk, cosine_similarity(&chunk.embedding, embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(chunk, score)| SearchResult {
                id: chunk.id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                score,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(seqs) = state.by_document.get(document_id).cloned() else {
            return Ok(0);
        };

        let previous_dimension = state.dimension;
        let removed: Vec<(u64, Chunk)> =
            seqs.into_iter().filter_map(|seq| state.remove(seq).map(|c| (seq, c))).collect();

        if let Err(e) = self.persist(&state).await {
            error!(document.id = document_id, error = %e, "snapshot write failed, rolling back delete");
            for (seq, chunk) in removed {
                state.add(seq, chunk);
            }
            state.dimension = previous_dimension;
            return Err(e);
        }
        Ok(removed.len())
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<(u64, DocumentSummary)> = state
            .by_document
            .iter()
            .filter_map(|(document_id, seqs)| {
                let first_seq = *seqs.first()?;
                let representative = seqs
                    .iter()
                    .filter_map(|seq| state.records.get(seq))
                    .min_by_key(|chunk| chunk.metadata.chunk_index)?;
                Some((
                    first_seq,
                    DocumentSummary {
                        document_id: document_id.clone(),
                        metadata: representative.metadata.clone(),
                        chunk_count: seqs.len(),
                    },
                ))
            })
            .collect();
        summaries.sort_by_key(|(first_seq, _)| *first_seq);
        Ok(summaries.into_iter().map(|(_, summary)| summary).collect())
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let next_seq = state.next_seq;
        let previous = std::mem::replace(&mut *state, StoreState { next_seq, ..Default::default() });
        let removed = previous.records.len();

        if let Err(e) = self.persist(&state).await {
            error!(error = %e, "snapshot write failed, rolling back clear");
            *state = previous;
            return Err(e);
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read().await;
        Ok(StoreStats {
            chunk_count: state.records.len(),
            document_count: state.by_document.len(),
            dimension: state.dimension,
            content_bytes: state.records.values().map(|c| c.content.len()).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ChunkMetadata, DocumentMetadata};

    fn chunk(id: &str, document_id: &str, index: usize, embedding: Vec<f32>) -> Chunk {
        let doc = DocumentMetadata::new(document_id, format!("{document_id}.txt"));
        Chunk {
            id: id.to_string(),
            content: format!("content of {id}"),
            embedding,
            metadata: ChunkMetadata::for_chunk(&doc, index),
        }
    }

    #[tokio::test]
    async fn ties_are_broken_by_insertion_order() {
        let store = InMemoryVectorStore::new();
        store
            .insert(vec![
                chunk("c", "doc", 0, vec![1.0, 0.0]),
                chunk("a", "doc", 1, vec![1.0, 0.0]),
                chunk("b", "doc", 2, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 3, None).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn batch_with_mixed_dimensions_is_rejected_whole() {
        let store = InMemoryVectorStore::new();
        let err = store
            .insert(vec![chunk("a", "doc", 0, vec![1.0, 0.0]), chunk("b", "doc", 1, vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
        assert_eq!(store.stats().await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryVectorStore::new();
        store.insert(vec![chunk("a", "doc", 0, vec![1.0])]).await.unwrap();
        let err = store.insert(vec![chunk("a", "doc", 1, vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption(_)));
        assert_eq!(store.stats().await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn stored_document_cannot_be_extended() {
        let store = InMemoryVectorStore::new();
        store.insert(vec![chunk("a0", "doc", 0, vec![1.0])]).await.unwrap();
        let err = store
            .insert(vec![chunk("n0", "new", 0, vec![1.0]), chunk("a1", "doc", 0, vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));

        let docs = store.documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn query_dimension_must_match() {
        let store = InMemoryVectorStore::new();
        assert!(store.search(&[1.0, 2.0, 3.0], 3, None).await.unwrap().is_empty());
        store.insert(vec![chunk("a", "doc", 0, vec![1.0, 0.0])]).await.unwrap();
        let err = store.search(&[1.0, 2.0, 3.0], 3, None).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn document_listing_uses_first_chunk() {
        let store = InMemoryVectorStore::new();
        store
            .insert(vec![
                chunk("b1", "beta", 1, vec![0.0, 1.0]),
                chunk("b0", "beta", 0, vec![0.0, 1.0]),
                chunk("a0", "alpha", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let docs = store.documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document_id, "beta");
        assert_eq!(docs[0].metadata.chunk_index, 0);
        assert_eq!(docs[0].chunk_count, 2);
        assert_eq!(docs[1].document_id, "alpha");
    }

    #[tokio::test]
    async fn clearing_resets_dimension() {
        let store = InMemoryVectorStore::new();
        store.insert(vec![chunk("a", "doc", 0, vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 1);
        store.insert(vec![chunk("b", "doc", 0, vec![1.0, 0.0, 0.0])]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().dimension, Some(3));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = InMemoryVectorStore::open(&path).await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption(_)));
    }
}
