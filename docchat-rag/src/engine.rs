//! The chat engine facade.
//!
//! [`ChatEngine`] wires a [`Chunker`], a [`VectorIndex`], a
//! [`RetrievalOrchestrator`] and a [`SessionStore`] together and exposes the
//! operations a routing layer needs.
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::{ChatEngine, HashingEmbeddingProvider, RagConfig};
//!
//! let engine = ChatEngine::builder()
//!     .config(RagConfig::from_env()?)
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .build()
//!     .await?;
//!
//! let report = engine.ingest_file(&bytes, "refunds.txt").await?;
//! let reply = engine.ask("What is the refund policy?", None).await?;
//! println!("{} (sources: {:?})", reply.response, reply.sources);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{
    ChunkMetadata, DocumentMetadata, DocumentSummary, MetadataFilter, SearchResult, file_extension,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{ExtractorRegistry, TextExtractor};
use crate::generation::TextGenerator;
use crate::index::VectorIndex;
use crate::inmemory::InMemoryVectorStore;
use crate::orchestrator::{AnswerStrategy, RetrievalOrchestrator};
use crate::session::{Role, SessionStore, Turn};
use crate::vectorstore::VectorStore;

/// Outcome of [`ChatEngine::ingest_file`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub file_type: String,
    pub byte_size: u64,
    /// Ids of the stored chunks, in `chunk_index` order.
    pub chunk_ids: Vec<String>,
}

impl IngestReport {
    pub fn chunk_count(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// Reply to one chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    /// The session the message was recorded in. Differs from the requested
    /// id when that id was unknown.
    pub session_id: String,
    pub sources: BTreeSet<String>,
    pub strategy: AnswerStrategy,
    pub timestamp: DateTime<Utc>,
}

/// Counters for the admin view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub active_sessions: usize,
    /// `"generative"` or `"extractive"`.
    pub answer_mode: String,
    pub content_bytes: usize,
    pub dimension: Option<usize>,
}

/// Retrieval-augmented chat over an indexed document corpus.
///
/// Construct one via [`ChatEngine::builder()`]. All operations take `&self`
/// and may be called concurrently.
pub struct ChatEngine {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    extractor: Arc<dyn TextExtractor>,
    orchestrator: RetrievalOrchestrator,
    sessions: SessionStore,
}

impl ChatEngine {
    /// Create a new [`ChatEngineBuilder`].
    pub fn builder() -> ChatEngineBuilder {
        ChatEngineBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &RetrievalOrchestrator {
        &self.orchestrator
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn index(&self) -> &VectorIndex {
        self.orchestrator.index()
    }

    /// Chunk, embed and store `text` as the document described by `metadata`.
    ///
    /// Returns the chunk ids in `chunk_index` order. Either all chunks are
    /// stored or none.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] if the text yields no chunk,
    /// [`RagError::InvalidInput`] if `metadata.document_id` is already stored,
    /// or the embedding/store error that aborted the insert.
    pub async fn ingest(&self, text: &str, metadata: DocumentMetadata) -> Result<Vec<String>> {
        let segments = self.chunker.split(text);
        if segments.is_empty() {
            return Err(RagError::EmptyDocument);
        }

        let chunks: Vec<(String, ChunkMetadata)> = segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| (segment, ChunkMetadata::for_chunk(&metadata, i)))
            .collect();

        let ids = self.index().insert(chunks).await.map_err(|e| {
            error!(document.id = %metadata.document_id, error = %e, "ingestion failed");
            e
        })?;

        info!(
            document.id = %metadata.document_id,
            document.filename = %metadata.filename,
            chunk_count = ids.len(),
            "ingested document"
        );
        Ok(ids)
    }

    /// Validate, extract and ingest an uploaded file under a fresh document id.
    ///
    /// The extension and size are checked before anything else; a file whose
    /// text has fewer than `min_document_chars` non-whitespace characters is
    /// rejected without touching the index.
    pub async fn ingest_file(&self, bytes: &[u8], filename: &str) -> Result<IngestReport> {
        let extension =
            file_extension(filename).ok_or_else(|| RagError::UnsupportedFormat("(none)".into()))?;
        if !self.config.allows_extension(&extension) {
            return Err(RagError::UnsupportedFormat(extension));
        }
        if bytes.len() > self.config.max_upload_bytes {
            return Err(RagError::InvalidInput(format!(
                "file size exceeds maximum of {} bytes",
                self.config.max_upload_bytes
            )));
        }

        let text = self.extractor.extract_text(bytes, &extension).await.map_err(|e| {
            error!(filename, error = %e, "text extraction failed");
            e
        })?;
        let content_chars = text.chars().filter(|c| !c.is_whitespace()).count();
        if content_chars < self.config.min_document_chars {
            debug!(filename, content_chars, "rejected near-empty document");
            return Err(RagError::EmptyDocument);
        }

        let document_id = Uuid::new_v4().to_string();
        let metadata = DocumentMetadata::new(document_id.clone(), filename)
            .with_byte_size(bytes.len() as u64);
        let file_type = metadata.file_type.clone();
        let chunk_ids = self.ingest(&text, metadata).await?;

        Ok(IngestReport {
            document_id,
            filename: filename.to_string(),
            file_type,
            byte_size: bytes.len() as u64,
            chunk_ids,
        })
    }

    /// Answer `message` within a session, creating the session if needed.
    ///
    /// Only input validation can fail; retrieval and generation problems are
    /// absorbed into the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if the trimmed message is empty or
    /// longer than `max_message_chars`.
    pub async fn ask(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RagError::InvalidInput("message must not be empty".into()));
        }
        let len = message.chars().count();
        if len > self.config.max_message_chars {
            return Err(RagError::InvalidInput(format!(
                "message is {len} characters, maximum is {}",
                self.config.max_message_chars
            )));
        }

        let session_id = self.sessions.get_or_create(session_id);
        self.sessions.append(&session_id, Role::User, message).await;

        let answer = self.orchestrator.answer(message, self.config.top_k).await;

        self.sessions.append(&session_id, Role::Assistant, answer.response.clone()).await;
        debug!(
            session.id = %session_id,
            strategy = ?answer.strategy,
            source_count = answer.sources.len(),
            "answered message"
        );

        Ok(ChatReply {
            response: answer.response,
            session_id,
            sources: answer.sources,
            strategy: answer.strategy,
            timestamp: Utc::now(),
        })
    }

    /// Raw scored retrieval, subject to the similarity threshold.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        self.orchestrator.retrieve(query, k, filter).await
    }

    /// Remove a document's chunks. Returns whether anything was removed.
    pub async fn remove_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.index().delete_by_document(document_id).await? > 0)
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.index().list_documents().await
    }

    /// Remove every chunk, returning how many were removed.
    pub async fn purge(&self) -> Result<usize> {
        self.index().clear().await
    }

    pub async fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions.history(session_id).await
    }

    /// End a session. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    /// Drop sessions idle for longer than `max_idle`.
    pub fn prune_sessions(&self, max_idle: Duration) -> usize {
        self.sessions.prune_idle(max_idle)
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let store = self.index().stats().await?;
        Ok(EngineStats {
            document_count: store.document_count,
            chunk_count: store.chunk_count,
            active_sessions: self.sessions.len(),
            answer_mode: self.orchestrator.mode().label().to_string(),
            content_bytes: store.content_bytes,
            dimension: store.dimension,
        })
    }
}

/// Builder for constructing a [`ChatEngine`].
///
/// The embedding provider is required. The store defaults to an in-memory
/// store, the extractor to [`ExtractorRegistry::default()`], and without a
/// generator the engine answers extractively.
#[derive(Default)]
pub struct ChatEngineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    extractor: Option<Arc<dyn TextExtractor>>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl ChatEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the text extractor used by [`ChatEngine::ingest_file`].
    ///
    /// Defaults to [`ExtractorRegistry::default`], which reads plain text
    /// only; binary formats need an extractor registered here.
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the generation backend. It is health-checked once in [`build`](Self::build).
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the [`ChatEngine`], health-checking the generator if one was set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if no embedding provider was set or
    /// the configuration cannot produce a chunker.
    pub async fn build(self) -> Result<ChatEngine> {
        let config = self.config.unwrap_or_default();
        let embedder = self.embedding_provider.ok_or_else(|| {
            RagError::InvalidConfig("embedding_provider is required".to_string())
        })?;
        let store = self.vector_store.unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
        let extractor = self.extractor.unwrap_or_else(|| Arc::new(ExtractorRegistry::default()));
        let chunker = config.chunker()?;

        let index = VectorIndex::new(embedder, store);
        let orchestrator = RetrievalOrchestrator::initialize(index, self.generator, &config).await;
        let sessions = SessionStore::new(config.max_sessions);

        Ok(ChatEngine { config, chunker, extractor, orchestrator, sessions })
    }
}
