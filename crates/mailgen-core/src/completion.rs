use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// A single non-streaming chat completion: one system turn, one user turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait implemented by each AI completion backend.
///
/// Implementations return the raw completion text. An absent completion is
/// reported as an empty string; deciding whether that is usable is the
/// caller's job.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;
}
