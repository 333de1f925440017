//! Embedding-aware index over stored chunks.
//!
//! [`VectorIndex`] pairs an [`EmbeddingProvider`] with a [`VectorStore`]:
//! text is embedded before the store is touched, so slow embedding calls
//! never hold the store's locks, and a failed embedding leaves the store
//! unchanged.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::document::{Chunk, ChunkMetadata, DocumentSummary, MetadataFilter, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::{StoreStats, VectorStore};

/// Nearest-neighbor index over chunk text and metadata.
///
/// # Example
///
/// ```rust,ignore
/// let index = VectorIndex::new(Arc::new(embedder), Arc::new(InMemoryVectorStore::new()));
/// let ids = index.insert(vec![(text, metadata)]).await?;
/// let hits = index.query("refund policy", 3, None).await?;
/// ```
#[derive(Clone)]
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl VectorIndex {
    /// Create an index embedding with `embedder` and storing into `store`.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Return a reference to the embedding provider.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed and store a batch of chunks, returning their assigned ids in
    /// input order.
    ///
    /// Either every chunk is stored or none is.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if embedding fails, or the
    /// store's error if the write is rejected.
    pub async fn insert(&self, chunks: Vec<(String, ChunkMetadata)>) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|(content, _)| content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await.map_err(|e| {
            error!(chunk_count = chunks.len(), error = %e, "embedding failed during insert");
            e
        })?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingUnavailable {
                provider: "embedder".to_string(),
                message: format!(
                    "returned {} embeddings for {} inputs",
                    embeddings.len(),
                    chunks.len()
                ),
            });
        }

        let records: Vec<Chunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|((content, metadata), embedding)| Chunk {
                id: Uuid::new_v4().to_string(),
                content,
                embedding,
                metadata,
            })
            .collect();
        let ids: Vec<String> = records.iter().map(|c| c.id.clone()).collect();

        self.store.insert(records).await.map_err(|e| {
            error!(chunk_count = ids.len(), error = %e, "store rejected insert");
            e
        })?;

        debug!(chunk_count = ids.len(), "inserted chunks");
        Ok(ids)
    }

    /// Return up to `k` chunks most similar to `text`, optionally restricted
    /// by `filter`, ordered by descending cosine similarity.
    ///
    /// An empty index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if the query cannot be embedded.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(text).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;
        let results = self.store.search(&embedding, k, filter).await?;
        debug!(result_count = results.len(), k, "query completed");
        Ok(results)
    }

    /// Remove every chunk of `document_id`, returning how many were removed.
    /// Unknown documents yield 0.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let removed = self.store.delete_document(document_id).await?;
        if removed > 0 {
            info!(document.id = document_id, chunk_count = removed, "deleted document");
        }
        Ok(removed)
    }

    /// One summary per stored document.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.store.documents().await
    }

    /// Remove every chunk, returning how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.store.clear().await?;
        info!(chunk_count = removed, "cleared index");
        Ok(removed)
    }

    /// Current store counters.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::document::DocumentMetadata;
    use crate::embedding::HashingEmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::EmbeddingUnavailable {
                provider: "down".into(),
                message: "connection refused".into(),
            })
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn metadata(document_id: &str, index: usize) -> ChunkMetadata {
        ChunkMetadata::for_chunk(&DocumentMetadata::new(document_id, "faq.txt"), index)
    }

    #[tokio::test]
    async fn failed_embedding_stores_nothing() {
        let store = Arc::new(InMemoryVectorStore::new());
        let index = VectorIndex::new(Arc::new(DownEmbedder), store.clone());

        let err = index
            .insert(vec![("a".into(), metadata("d", 0)), ("b".into(), metadata("d", 1))])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
        assert_eq!(store.stats().await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn ids_are_unique_and_in_input_order() {
        let index = VectorIndex::new(
            Arc::new(HashingEmbeddingProvider::new(64).unwrap()),
            Arc::new(InMemoryVectorStore::new()),
        );
        let ids = index
            .insert(vec![
                ("shipping takes five days".into(), metadata("d", 0)),
                ("returns are free".into(), metadata("d", 1)),
            ])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);

        let hits = index.query("returns are free", 1, None).await.unwrap();
        assert_eq!(hits[0].id, ids[1]);
    }

    #[tokio::test]
    async fn zero_k_returns_nothing() {
        let index = VectorIndex::new(Arc::new(DownEmbedder), Arc::new(InMemoryVectorStore::new()));
        assert!(index.query("anything", 0, None).await.unwrap().is_empty());
    }
}
