//! # docchat-rag
//!
//! Retrieval-augmented chat over a corpus of uploaded documents.
//!
//! Documents are split by a [`Chunker`], embedded by an
//! [`EmbeddingProvider`] and stored in a [`VectorStore`]. Questions are
//! answered by the [`RetrievalOrchestrator`], either through a
//! [`TextGenerator`] or extractively from the retrieved passages, and
//! recorded per conversation in a [`SessionStore`]. [`ChatEngine`] ties it
//! all together.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docchat_rag::{ChatEngine, DocumentMetadata, HashingEmbeddingProvider};
//!
//! let engine = ChatEngine::builder()
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .build()
//!     .await?;
//!
//! engine.ingest(policy_text, DocumentMetadata::new("refunds", "refunds.txt")).await?;
//! let reply = engine.ask("How long do refunds take?", None).await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `openai` | OpenAI-compatible embedding provider and chat generator |

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod inmemory;
pub mod orchestrator;
pub mod session;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, split_text};
pub use config::{ChunkingStrategy, RagConfig, RagConfigBuilder};
pub use document::{
    Chunk, ChunkMetadata, DocumentMetadata, DocumentSummary, MetadataFilter, SearchResult,
    file_extension,
};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};
pub use engine::{ChatEngine, ChatEngineBuilder, ChatReply, EngineStats, IngestReport};
pub use error::{RagError, Result};
pub use extract::{ExtractorRegistry, PlainTextExtractor, TextExtractor};
pub use generation::TextGenerator;
pub use index::VectorIndex;
pub use inmemory::InMemoryVectorStore;
pub use orchestrator::{
    Answer, AnswerMode, AnswerStrategy, INSUFFICIENT_INFORMATION, PROCESSING_ERROR,
    RetrievalOrchestrator,
};
pub use session::{Role, SessionStore, Turn};
pub use vectorstore::{StoreStats, VectorStore};
