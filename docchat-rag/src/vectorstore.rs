//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, DocumentSummary, MetadataFilter, SearchResult};
use crate::error::Result;

/// Counters describing the contents of a [`VectorStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of stored chunks.
    pub chunk_count: usize,
    /// Number of distinct documents.
    pub document_count: usize,
    /// Dimension shared by every stored embedding, if any chunk is stored.
    pub dimension: Option<usize>,
    /// Total bytes of stored chunk content.
    pub content_bytes: usize,
}

/// A storage backend for chunk embeddings with similarity search.
///
/// Implementations own the chunks they store and must apply each call
/// atomically: a batch insert is either fully visible and durable or not at
/// all, and a search never observes a document half-deleted. Every stored
/// embedding has the same dimension.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.insert(chunks).await?;
/// let results = store.search(&query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks with their embeddings set. All-or-nothing.
    ///
    /// A batch may not add chunks to a document that is already stored;
    /// such a batch fails with [`RagError::InvalidInput`](crate::RagError::InvalidInput).
    async fn insert(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Return up to `top_k` chunks most similar to `embedding` that match
    /// `filter`, ordered by descending score; ties go to the chunk inserted
    /// first.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every chunk of `document_id`, returning how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// One summary per stored document, in order of first insertion.
    async fn documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Remove every chunk, returning how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Current counters.
    async fn stats(&self) -> Result<StoreStats>;
}
