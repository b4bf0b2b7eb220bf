use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CommonError;
use crate::openai::{ChatCompletionRequest, ChatCompletionResponse, Message, OpenAiClient};

/// Sends one prompt to a language model and returns its raw reply text.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CommonError>;
}

/// Single-turn chat generation at temperature 0 against an OpenAI-compatible host.
pub struct ChatGenerator {
    client: Arc<OpenAiClient>,
    model: String,
}

impl ChatGenerator {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationGateway for ChatGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CommonError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(0.0),
        };
        let response = self.client.chat_completions(&request).await?;
        if let Some(usage) = &response.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "generation usage"
            );
        }
        reply_text(response)
    }
}

fn reply_text(response: ChatCompletionResponse) -> Result<String, CommonError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CommonError::Model("missing choices[0].message.content".to_string()))
}
