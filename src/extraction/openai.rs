//! OpenAI-backed clip generation.

use super::{ClipExtraction, ClipModel};
use crate::error::{KlippError, Result};
use crate::openai::create_client;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_trait::async_trait;
use tracing::debug;

/// Clip extraction via OpenAI chat completions.
pub struct OpenAIClipModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAIClipModel {
    pub fn new() -> Self {
        Self::with_model("gpt-5-mini")
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            client: create_client(),
            model: model.to_string(),
        }
    }

    /// Parse the model's JSON reply, tolerating prose or markdown fences
    /// around the object.
    fn parse_extraction(response: &str) -> Result<ClipExtraction> {
        let json_start = response.find('{');
        let json_end = response.rfind('}');

        let json_str = match (json_start, json_end) {
            (Some(start), Some(end)) if end > start => &response[start..=end],
            _ => response,
        };

        serde_json::from_str(json_str).map_err(|e| {
            KlippError::Extraction(format!(
                "Failed to parse clip response: {}. Response was: {}",
                e,
                truncate_reply(response, 500)
            ))
        })
    }
}

/// Truncate a model reply for diagnostics without splitting a multibyte
/// character; replies are not guaranteed to be ASCII.
fn truncate_reply(reply: &str, max_bytes: usize) -> &str {
    if reply.len() <= max_bytes {
        return reply;
    }
    let mut end = max_bytes;
    while !reply.is_char_boundary(end) {
        end -= 1;
    }
    &reply[..end]
}

impl Default for OpenAIClipModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipModel for OpenAIClipModel {
    async fn extract_clips(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ClipExtraction> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| KlippError::Extraction(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(|e| KlippError::Extraction(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .temperature(0.3)
            .build()
            .map_err(|e| KlippError::Extraction(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| KlippError::OpenAI(format!("Clip extraction API error: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| KlippError::Extraction("Empty response from model".to_string()))?;

        debug!("Clip extraction response: {}", truncate_reply(content, 500));

        Self::parse_extraction(content)
    }
}
