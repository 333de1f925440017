//! Turns a user message into a grounded answer.
//!
//! The [`RetrievalOrchestrator`] always retrieves first. With a generation
//! backend ([`AnswerMode::Generative`]) the retrieved passages become the
//! context of a prompt; without one ([`AnswerMode::Extractive`]) the
//! passages themselves are returned, trimmed to a character budget. The mode
//! is fixed when the orchestrator is built. A generation failure degrades
//! only the call it happens in.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RagConfig;
use crate::document::{MetadataFilter, SearchResult};
use crate::error::Result;
use crate::generation::TextGenerator;
use crate::index::VectorIndex;

/// Reply when retrieval finds nothing relevant.
pub const INSUFFICIENT_INFORMATION: &str = "I don't have enough information to answer that question. Please upload relevant documents or contact our support team.";

/// Reply when retrieval itself fails.
pub const PROCESSING_ERROR: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

const EXTRACTIVE_PREFIX: &str = "Based on the available information:\n\n";

/// How answers are composed, decided once per orchestrator.
#[derive(Clone)]
pub enum AnswerMode {
    /// Retrieved passages are handed to a language model.
    Generative(Arc<dyn TextGenerator>),
    /// Retrieved passages are returned directly.
    Extractive,
}

impl AnswerMode {
    pub fn is_generative(&self) -> bool {
        matches!(self, Self::Generative(_))
    }

    /// `"generative"` or `"extractive"`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generative(_) => "generative",
            Self::Extractive => "extractive",
        }
    }
}

impl fmt::Debug for AnswerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generative(generator) => f.debug_tuple("Generative").field(&generator.name()).finish(),
            Self::Extractive => f.write_str("Extractive"),
        }
    }
}

/// Which path produced an [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    /// The generation backend wrote the response.
    Generated,
    /// The response is an excerpt of the retrieved passages.
    Extractive,
    /// Nothing relevant was retrieved.
    NoContext,
    /// Retrieval failed.
    Unavailable,
}

/// A response together with the files it drew from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    /// Filenames of the passages the response is built on.
    pub sources: BTreeSet<String>,
    pub strategy: AnswerStrategy,
}

impl Answer {
    fn fixed(response: &str, strategy: AnswerStrategy) -> Self {
        Self { response: response.to_string(), sources: BTreeSet::new(), strategy }
    }
}

/// Retrieval plus answer composition over a [`VectorIndex`].
pub struct RetrievalOrchestrator {
    index: VectorIndex,
    mode: AnswerMode,
    similarity_threshold: Option<f32>,
    extractive_char_budget: usize,
    max_context_chars: usize,
}

impl RetrievalOrchestrator {
    /// Create an orchestrator with an explicit mode.
    pub fn new(index: VectorIndex, mode: AnswerMode, config: &RagConfig) -> Self {
        Self {
            index,
            mode,
            similarity_threshold: config.similarity_threshold,
            extractive_char_budget: config.extractive_char_budget,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Create an orchestrator that never calls a generation backend.
    pub fn extractive(index: VectorIndex, config: &RagConfig) -> Self {
        Self::new(index, AnswerMode::Extractive, config)
    }

    /// Pick the mode by health-checking `generator` once.
    ///
    /// A missing or unhealthy backend yields [`AnswerMode::Extractive`] for
    /// the lifetime of the orchestrator.
    pub async fn initialize(
        index: VectorIndex,
        generator: Option<Arc<dyn TextGenerator>>,
        config: &RagConfig,
    ) -> Self {
        let mode = match generator {
            None => {
                info!("no generation backend configured, answering extractively");
                AnswerMode::Extractive
            }
            Some(generator) => match generator.health_check().await {
                Ok(()) => {
                    info!(backend = generator.name(), "generation backend ready");
                    AnswerMode::Generative(generator)
                }
                Err(e) => {
                    warn!(
                        backend = generator.name(),
                        error = %e,
                        "generation backend failed its health check, answering extractively"
                    );
                    AnswerMode::Extractive
                }
            },
        };
        Self::new(index, mode, config)
    }

    pub fn mode(&self) -> &AnswerMode {
        &self.mode
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Query the index and drop results under the similarity threshold.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let results = self.index.query(query, k, filter).await?;
        Ok(match self.similarity_threshold {
            Some(threshold) => results.into_iter().filter(|r| r.score >= threshold).collect(),
            None => results,
        })
    }

    /// Answer `message` from the `k` most relevant passages.
    ///
    /// Never fails: retrieval errors become [`PROCESSING_ERROR`], an empty
    /// retrieval becomes [`INSUFFICIENT_INFORMATION`] and generation errors
    /// fall back to an extractive answer.
    pub async fn answer(&self, message: &str, k: usize) -> Answer {
        let results = match self.retrieve(message, k, None).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "retrieval failed while answering");
                return Answer::fixed(PROCESSING_ERROR, AnswerStrategy::Unavailable);
            }
        };
        if results.is_empty() {
            debug!(k, "no relevant passages");
            return Answer::fixed(INSUFFICIENT_INFORMATION, AnswerStrategy::NoContext);
        }

        let AnswerMode::Generative(generator) = &self.mode else {
            return extractive_answer(&results, self.extractive_char_budget);
        };

        let (context, sources) = build_context(&results, self.max_context_chars);
        let prompt = build_prompt(&context, message);
        match generator.generate(&prompt).await {
            Ok(response) if !response.trim().is_empty() => {
                debug!(backend = generator.name(), passages = results.len(), "generated answer");
                Answer { response, sources, strategy: AnswerStrategy::Generated }
            }
            Ok(_) => {
                warn!(backend = generator.name(), "generation returned nothing, answering extractively");
                extractive_answer(&results, self.extractive_char_budget)
            }
            Err(e) => {
                warn!(backend = generator.name(), error = %e, "generation failed, answering extractively");
                extractive_answer(&results, self.extractive_char_budget)
            }
        }
    }
}

fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful AI assistant for a business website. Use the following context to \
         answer the user's question. If you don't know the answer based on the context, say so \
         politely.\n\nContext: {context}\n\nQuestion: {question}\n\nAnswer: "
    )
}

/// Join passages in rank order until the next one would exceed `max_chars`.
/// The top passage is always included, cut to `max_chars` if needed.
fn build_context(results: &[SearchResult], max_chars: usize) -> (String, BTreeSet<String>) {
    let mut context = String::new();
    let mut used = 0;
    let mut sources = BTreeSet::new();
    for (rank, result) in results.iter().enumerate() {
        let separator = if rank == 0 { 0 } else { 2 };
        let len = result.content.chars().count();
        if rank > 0 && used + separator + len > max_chars {
            break;
        }
        if rank > 0 {
            context.push_str("\n\n");
        }
        if len > max_chars {
            context.extend(result.content.chars().take(max_chars));
            used = max_chars;
        } else {
            context.push_str(&result.content);
            used += separator + len;
        }
        sources.insert(result.metadata.filename.clone());
    }
    (context, sources)
}

/// The top passages joined and cut to `budget` characters.
fn extractive_answer(results: &[SearchResult], budget: usize) -> Answer {
    let mut excerpt = String::new();
    let mut remaining = budget;
    let mut truncated = false;
    let mut sources = BTreeSet::new();
    for (rank, result) in results.iter().enumerate() {
        if rank > 0 {
            let separator: String = "\n\n".chars().take(remaining).collect();
            remaining -= separator.chars().count();
            excerpt.push_str(&separator);
        }
        if remaining == 0 {
            truncated = true;
            break;
        }
        let taken: String = result.content.chars().take(remaining).collect();
        let taken_len = taken.chars().count();
        truncated = taken_len < result.content.chars().count();
        remaining -= taken_len;
        excerpt.push_str(&taken);
        sources.insert(result.metadata.filename.clone());
        if truncated {
            break;
        }
    }
    let excerpt = excerpt.trim_end();
    let response = if truncated {
        format!("{EXTRACTIVE_PREFIX}{excerpt}...")
    } else {
        format!("{EXTRACTIVE_PREFIX}{excerpt}")
    };
    Answer { response, sources, strategy: AnswerStrategy::Extractive }
}
