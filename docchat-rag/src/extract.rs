//! Text extraction from uploaded files.
//!
//! Parsing binary formats (PDF, DOCX, XLSX) is left to caller-provided
//! [`TextExtractor`]s; the crate ships a plain-text extractor and a registry
//! that routes by file extension.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Turns the bytes of an uploaded file into text.
///
/// `extension` is lower-cased and includes the dot, e.g. `.pdf`.
/// Implementations return [`RagError::UnsupportedFormat`] for extensions they
/// do not handle and [`RagError::ExtractionFailed`] for unreadable content.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of a file.
    async fn extract_text(&self, bytes: &[u8], extension: &str) -> Result<String>;
}

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".csv"];

/// Extracts UTF-8 text files (`.txt`, `.md`, `.csv`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_text(&self, bytes: &[u8], extension: &str) -> Result<String> {
        if !PLAIN_TEXT_EXTENSIONS.contains(&extension) {
            return Err(RagError::UnsupportedFormat(extension.to_string()));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RagError::ExtractionFailed(format!("file is not valid UTF-8: {e}")))?;
        Ok(text.trim_start_matches('\u{feff}').trim().to_string())
    }
}

/// Routes extraction to the extractor registered for each extension.
///
/// ```rust,ignore
/// let registry = ExtractorRegistry::default()
///     .register(".pdf", Arc::new(MyPdfExtractor))
///     .register(".docx", Arc::new(MyDocxExtractor));
/// ```
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// An empty registry that rejects every extension.
    pub fn empty() -> Self {
        Self { extractors: HashMap::new() }
    }

    /// Register `extractor` for `extension` (case-insensitive, with the dot).
    pub fn register(mut self, extension: &str, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.insert(extension.to_ascii_lowercase(), extractor);
        self
    }

    /// Whether an extractor is registered for `extension`.
    pub fn supports(&self, extension: &str) -> bool {
        self.extractors.contains_key(&extension.to_ascii_lowercase())
    }
}

impl Default for ExtractorRegistry {
    /// A registry handling `.txt`, `.md` and `.csv`.
    ///
    /// The default upload allow-list also admits `.pdf`, `.docx` and `.xlsx`;
    /// uploads of those fail with [`RagError::UnsupportedFormat`] until an
    /// extractor is [`register`](Self::register)ed for them. `.md` and `.csv`
    /// must be added to the allow-list before they are accepted.
    fn default() -> Self {
        let plain: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
        PLAIN_TEXT_EXTENSIONS
            .iter()
            .fold(Self::empty(), |registry, ext| registry.register(ext, plain.clone()))
    }
}

#[async_trait]
impl TextExtractor for ExtractorRegistry {
    async fn extract_text(&self, bytes: &[u8], extension: &str) -> Result<String> {
        let extension = extension.to_ascii_lowercase();
        let extractor = self
            .extractors
            .get(&extension)
            .ok_or_else(|| RagError::UnsupportedFormat(extension.clone()))?;
        extractor.extract_text(bytes, &extension).await
    }
}
