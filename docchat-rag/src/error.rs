//! Error types for the `docchat-rag` crate.

use thiserror::Error;

/// Errors that can occur in retrieval and chat operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking or engine parameters are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller input was rejected before any processing took place.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The embedding backend could not be reached or loaded.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An embedding did not have the dimension of the vectors already stored.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the vectors already in the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// The file extension is not one the engine accepts.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The extractor could not read text out of the uploaded bytes.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Extraction succeeded but produced too little text to index.
    #[error("Document contains no extractable text")]
    EmptyDocument,

    /// The generation backend failed. Recovered locally by the orchestrator.
    #[error("Generation failed ({backend}): {message}")]
    GenerationFailed {
        /// The generation backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The index detected an internal inconsistency.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// The index snapshot could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl RagError {
    /// Whether the error was caused by the caller's input rather than by an
    /// upstream collaborator or the engine itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidInput(_)
                | Self::UnsupportedFormat(_)
                | Self::EmptyDocument
        )
    }

    /// A caller-facing description that does not leak internal detail.
    ///
    /// Input errors keep their message since it describes what the caller
    /// sent. Everything else collapses to a generic sentence.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidConfig(msg) | Self::InvalidInput(msg) => msg.clone(),
            Self::UnsupportedFormat(ext) => format!("file type {ext} is not allowed"),
            Self::EmptyDocument => {
                "could not extract text from the document or document is empty".to_string()
            }
            Self::EmbeddingUnavailable { .. }
            | Self::ExtractionFailed(_)
            | Self::DimensionMismatch { .. } => "could not process this document".to_string(),
            Self::GenerationFailed { .. }
            | Self::IndexCorruption(_)
            | Self::Persistence(_) => "internal error, please try again".to_string(),
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Persistence(err.to_string())
    }
}

/// A convenience result type for docchat operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failures_do_not_leak_detail() {
        let err = RagError::EmbeddingUnavailable {
            provider: "OpenAI".into(),
            message: "connection refused to 10.0.0.3:443".into(),
        };
        assert!(!err.is_client_error());
        assert_eq!(err.user_message(), "could not process this document");

        let err = RagError::ExtractionFailed("xref table corrupt at byte 9912".into());
        assert_eq!(err.user_message(), "could not process this document");
    }

    #[test]
    fn input_errors_are_client_errors() {
        assert!(RagError::UnsupportedFormat(".exe".into()).is_client_error());
        assert!(RagError::EmptyDocument.is_client_error());
        assert!(RagError::InvalidInput("message must not be empty".into()).is_client_error());
        assert_eq!(
            RagError::UnsupportedFormat(".exe".into()).user_message(),
            "file type .exe is not allowed"
        );
    }
}
