//! Client for the Anthropic Messages API.

use super::{ChatMessage, CommandGenerator, GeneratorError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicGenerator {
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
impl CommandGenerator for AnthropicGenerator {
    async fn generate(
        &self,
        request: &str,
        history: &[ChatMessage],
    ) -> Result<String, GeneratorError> {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(request));

        debug!(model = %self.model, turns = messages.len(), "calling Anthropic Messages API");

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&MessagesRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                system: &self.system_prompt,
                messages: &messages,
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

        let resp: MessagesResponse = response.json().await?;
        let text = resp
            .content
            .iter()
            .filter_map(|block| {
                if block.block_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let text = text.trim();
        if text.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}
