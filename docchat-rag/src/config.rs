//! Configuration for the chat engine.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunking::{Chunker, FixedSizeChunker, RecursiveChunker};
use crate::error::{RagError, Result};

/// Which [`Chunker`] the engine splits documents with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Natural-boundary splitting ([`RecursiveChunker`]).
    #[default]
    Recursive,
    /// Fixed character windows ([`FixedSizeChunker`]).
    Fixed,
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "fixed" => Ok(Self::Fixed),
            other => Err(RagError::InvalidConfig(format!("unknown chunking strategy '{other}'"))),
        }
    }
}

/// Configuration parameters for ingestion, retrieval and sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunking strategy.
    pub chunking: ChunkingStrategy,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Minimum similarity score for results; `None` keeps everything.
    pub similarity_threshold: Option<f32>,
    /// Character budget of the extractive fallback answer.
    pub extractive_char_budget: usize,
    /// Character budget of the context block in generation prompts.
    pub max_context_chars: usize,
    /// Longest accepted chat message, in characters.
    pub max_message_chars: usize,
    /// Documents with fewer non-whitespace characters are rejected.
    pub min_document_chars: usize,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Accepted file extensions, lower-cased with the dot.
    pub allowed_extensions: Vec<String>,
    /// Cap on live sessions; the least recently active is evicted beyond it.
    pub max_sessions: Option<usize>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunking: ChunkingStrategy::Recursive,
            top_k: 3,
            similarity_threshold: None,
            extractive_char_budget: 500,
            max_context_chars: 4000,
            max_message_chars: 2000,
            min_document_chars: 10,
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_extensions: [".pdf", ".txt", ".docx", ".xlsx"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_sessions: Some(10_000),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Defaults overridden by `DOCCHAT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if a variable does not parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(v) = parse_var(&lookup, "DOCCHAT_CHUNK_SIZE")? {
            builder = builder.chunk_size(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_CHUNKING")? {
            builder = builder.chunking(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_SIMILARITY_THRESHOLD")? {
            builder = builder.similarity_threshold(Some(v));
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_EXTRACTIVE_CHAR_BUDGET")? {
            builder = builder.extractive_char_budget(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_MAX_CONTEXT_CHARS")? {
            builder = builder.max_context_chars(v);
        }
        if let Some(v) = parse_var(&lookup, "DOCCHAT_MAX_UPLOAD_BYTES")? {
            builder = builder.max_upload_bytes(v);
        }
        if let Some(v) = lookup("DOCCHAT_ALLOWED_EXTENSIONS") {
            builder = builder.allowed_extensions(v.split(',').map(str::trim));
        }
        if let Some(v) = lookup("DOCCHAT_MAX_SESSIONS") {
            let cap = match v.trim() {
                "" | "none" | "unbounded" => None,
                n => Some(n.parse::<usize>().map_err(|e| {
                    RagError::InvalidConfig(format!("DOCCHAT_MAX_SESSIONS='{n}': {e}"))
                })?),
            };
            builder = builder.max_sessions(cap);
        }
        builder.build()
    }

    /// Instantiate the configured [`Chunker`].
    pub fn chunker(&self) -> Result<Arc<dyn Chunker>> {
        Ok(match self.chunking {
            ChunkingStrategy::Recursive => {
                Arc::new(RecursiveChunker::new(self.chunk_size, self.chunk_overlap)?)
            }
            ChunkingStrategy::Fixed => {
                Arc::new(FixedSizeChunker::new(self.chunk_size, self.chunk_overlap)?)
            }
        })
    }

    /// Whether uploads with `extension` are accepted.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| RagError::InvalidConfig(format!("{key}='{raw}': {e}")))
        })
        .transpose()
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the character budget of extractive answers.
    pub fn extractive_char_budget(mut self, budget: usize) -> Self {
        self.config.extractive_char_budget = budget;
        self
    }

    /// Set the character budget of the prompt context block.
    pub fn max_context_chars(mut self, budget: usize) -> Self {
        self.config.max_context_chars = budget;
        self
    }

    /// Set the longest accepted chat message.
    pub fn max_message_chars(mut self, max: usize) -> Self {
        self.config.max_message_chars = max;
        self
    }

    /// Set the minimum amount of text a document must contain.
    pub fn min_document_chars(mut self, min: usize) -> Self {
        self.config.min_document_chars = min;
        self
    }

    /// Set the largest accepted upload in bytes.
    pub fn max_upload_bytes(mut self, max: usize) -> Self {
        self.config.max_upload_bytes = max;
        self
    }

    /// Replace the accepted file extensions.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| if ext.starts_with('.') { ext } else { format!(".{ext}") })
            .collect();
        self
    }

    /// Set the session cap; `None` disables eviction.
    pub fn max_sessions(mut self, cap: Option<usize>) -> Self {
        self.config.max_sessions = cap;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `extractive_char_budget == 0` or `max_message_chars == 0`
    /// - `max_sessions == Some(0)`
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be greater than zero".into()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be greater than zero".into()));
        }
        if config.extractive_char_budget == 0 {
            return Err(RagError::InvalidConfig(
                "extractive_char_budget must be greater than zero".into(),
            ));
        }
        if config.max_message_chars == 0 {
            return Err(RagError::InvalidConfig("max_message_chars must be greater than zero".into()));
        }
        if config.max_sessions == Some(0) {
            return Err(RagError::InvalidConfig("max_sessions must be at least one".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config, RagConfig::default());
        assert_eq!((config.chunk_size, config.chunk_overlap, config.top_k), (1000, 200, 3));
        assert!(config.allows_extension(".PDF"));
        assert!(!config.allows_extension(".exe"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = RagConfig::from_lookup(lookup(&[
            ("DOCCHAT_CHUNK_SIZE", "500"),
            ("DOCCHAT_CHUNK_OVERLAP", " 50 "),
            ("DOCCHAT_CHUNKING", "fixed"),
            ("DOCCHAT_ALLOWED_EXTENSIONS", "txt, .MD"),
            ("DOCCHAT_MAX_SESSIONS", "none"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.chunking, ChunkingStrategy::Fixed);
        assert_eq!(config.allowed_extensions, vec![".txt".to_string(), ".md".to_string()]);
        assert_eq!(config.max_sessions, None);
    }

    #[test]
    fn malformed_env_value_is_invalid_config() {
        let err = RagConfig::from_lookup(lookup(&[("DOCCHAT_TOP_K", "three")])).unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(msg) if msg.contains("DOCCHAT_TOP_K")));
    }
}
