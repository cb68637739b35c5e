//! Client for the OpenAI Chat Completions API.

use super::{ChatMessage, CommandGenerator, GeneratorError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: String, max_tokens: u32, system_prompt: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
            system_prompt,
        }
    }
}

#[async_trait]
impl CommandGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &str,
        history: &[ChatMessage],
    ) -> Result<String, GeneratorError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
        });
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(request));

        debug!(model = %self.model, turns = messages.len(), "calling OpenAI Chat Completions API");

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&CompletionsRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resp: CompletionsResponse = response.json().await?;
        let text = resp
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}
