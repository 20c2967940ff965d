//! The metered backend call.

mod openrouter;

pub use openrouter::OpenRouterClient;

use async_trait::async_trait;

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Model id; part of every cache key.
    fn model(&self) -> &str;

    /// Summarize `text`. Returns the complete result or an error; partial
    /// output is never returned.
    async fn complete(&self, text: &str) -> Result<String, String>;
}

pub fn summarize_prompt(text: &str) -> String {
    format!("Summarize this text in 2 sentences: {}", text)
}
