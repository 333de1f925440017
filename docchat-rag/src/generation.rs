//! Text generation backend trait.

use async_trait::async_trait;

use crate::error::Result;

/// A language-model backend that turns a prompt into text.
///
/// Failures are reported as [`RagError::GenerationFailed`](crate::RagError::GenerationFailed);
/// the orchestrator recovers from them and never surfaces them to callers.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// A short name for logs, e.g. the model identifier.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Check once at startup that the backend is usable.
    ///
    /// The default implementation assumes it is.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
