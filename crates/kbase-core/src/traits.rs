use async_trait::async_trait;

use crate::error::Result;
use crate::types::CompletionPrompt;

/// Remote text-to-vector capability.
///
/// Returns one vector per input, in input order, all of one fixed length for
/// a given `model_id()`. Transport and quota failures surface as `Error::Service`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model; one index generation uses exactly one.
    fn model_id(&self) -> &str;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Remote structured-prompt-to-text capability. Output is untrusted.
#[async_trait]
pub trait Completer: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, prompt: &CompletionPrompt) -> Result<String>;
}
