//! Data types for document metadata, chunks, and search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing a source document, supplied at ingestion time.
///
/// Every chunk cut from the document carries a copy of these fields plus its
/// own `chunk_index`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Identifies the owning document. All chunks of a document share it.
    pub document_id: String,
    /// Original file name as uploaded.
    pub filename: String,
    /// Lower-cased file extension including the dot, e.g. `.pdf`.
    pub file_type: String,
    /// Size of the uploaded file in bytes.
    pub byte_size: u64,
    /// When the document was ingested.
    pub uploaded_at: DateTime<Utc>,
    /// Free-form additional fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl DocumentMetadata {
    /// Create metadata for `filename`, deriving `file_type` from its extension.
    pub fn new(document_id: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            document_id: document_id.into(),
            file_type: file_extension(&filename).unwrap_or_default(),
            filename,
            byte_size: 0,
            uploaded_at: Utc::now(),
            extra: HashMap::new(),
        }
    }

    /// Set the byte size of the source file.
    pub fn with_byte_size(mut self, byte_size: u64) -> Self {
        self.byte_size = byte_size;
        self
    }

    /// Add a free-form metadata field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Returns the lower-cased extension of `filename` including the leading dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let pos = name.rfind('.')?;
    if pos == 0 || pos == name.len() - 1 {
        return None;
    }
    Some(name[pos..].to_ascii_lowercase())
}

/// Metadata attached to every stored [`Chunk`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// The owning document.
    pub document_id: String,
    /// Original file name of the owning document.
    pub filename: String,
    /// 0-based position of the chunk within its document.
    pub chunk_index: usize,
    /// Lower-cased file extension including the dot.
    pub file_type: String,
    /// Size of the source file in bytes.
    pub byte_size: u64,
    /// When the owning document was ingested.
    pub uploaded_at: DateTime<Utc>,
    /// Free-form fields inherited from the document.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl ChunkMetadata {
    /// Derive the metadata of the chunk at `chunk_index` of `document`.
    pub fn for_chunk(document: &DocumentMetadata, chunk_index: usize) -> Self {
        Self {
            document_id: document.document_id.clone(),
            filename: document.filename.clone(),
            chunk_index,
            file_type: document.file_type.clone(),
            byte_size: document.byte_size,
            uploaded_at: document.uploaded_at,
            extra: document.extra.clone(),
        }
    }
}

/// A segment of a document together with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier assigned at insertion.
    pub id: String,
    /// The text of the chunk.
    pub content: String,
    /// The vector embedding of `content`.
    pub embedding: Vec<f32>,
    /// Document fields plus the chunk's position.
    pub metadata: ChunkMetadata,
}

/// A retrieved chunk paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the retrieved chunk.
    pub id: String,
    /// The text of the retrieved chunk.
    pub content: String,
    /// Metadata of the retrieved chunk.
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

/// One entry of the document listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    /// The document's identifier.
    pub document_id: String,
    /// Metadata of the document's first chunk by `chunk_index`.
    pub metadata: ChunkMetadata,
    /// Number of chunks currently stored for the document.
    pub chunk_count: usize,
}

/// Equality constraints on chunk metadata. Unset fields match anything.
///
/// ```rust,ignore
/// let filter = MetadataFilter::default().file_type(".pdf");
/// let hits = index.query("refund policy", 5, Some(&filter)).await?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl MetadataFilter {
    /// Restrict matches to one document.
    pub fn document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Restrict matches to chunks of files with this name.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Restrict matches to one file type, e.g. `.pdf`.
    pub fn file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    /// Require a free-form metadata field to equal `value`.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether `metadata` satisfies every constraint of this filter.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.document_id.as_ref().is_none_or(|id| *id == metadata.document_id)
            && self.filename.as_ref().is_none_or(|name| *name == metadata.filename)
            && self.file_type.as_ref().is_none_or(|ft| *ft == metadata.file_type)
            && self.extra.iter().all(|(k, v)| metadata.extra.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(file_extension("Q3 Report.PDF").as_deref(), Some(".pdf"));
        assert_eq!(file_extension("uploads/archive.tar.xlsx").as_deref(), Some(".xlsx"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".env"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn chunk_metadata_inherits_document_fields() {
        let doc = DocumentMetadata::new("doc-1", "policy.txt")
            .with_byte_size(2048)
            .with_extra("department", "support");
        let meta = ChunkMetadata::for_chunk(&doc, 3);
        assert_eq!(meta.document_id, "doc-1");
        assert_eq!(meta.file_type, ".txt");
        assert_eq!(meta.chunk_index, 3);
        assert_eq!(meta.byte_size, 2048);
        assert_eq!(meta.extra.get("department").map(String::as_str), Some("support"));
    }

    #[test]
    fn filter_matches_all_constraints() {
        let doc = DocumentMetadata::new("doc-1", "policy.txt").with_extra("lang", "en");
        let meta = ChunkMetadata::for_chunk(&doc, 0);

        assert!(MetadataFilter::default().matches(&meta));
        assert!(MetadataFilter::default().document_id("doc-1").file_type(".txt").matches(&meta));
        assert!(MetadataFilter::default().extra("lang", "en").matches(&meta));
        assert!(!MetadataFilter::default().extra("lang", "de").matches(&meta));
        assert!(!MetadataFilter::default().filename("other.txt").matches(&meta));
        assert!(!MetadataFilter::default().document_id("doc-2").matches(&meta));
    }
}
