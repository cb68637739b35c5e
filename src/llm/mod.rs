//! LLM Command Generation
//!
//! The boundary between conversation and the validation engine. Providers
//! are hidden behind a single capability: produce a candidate command string
//! from a request and the conversation history. The engine downstream treats
//! that string as untrusted regardless of which provider produced it.

mod anthropic;
mod openai;

pub use anthropic::AnthropicGenerator;
pub use openai::OpenAiGenerator;

use crate::config::{LlmConfig, LlmProvider};
use crate::engine::ToolVariant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One turn of conversation, in the role/content shape both provider APIs
/// accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Errors from the generator boundary. These abort the current request but
/// never the session.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned an error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("provider response contained no usable text")]
    EmptyResponse,

    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
}

/// Capability to turn a natural-language request into a candidate command.
#[async_trait]
pub trait CommandGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &str,
        history: &[ChatMessage],
    ) -> Result<String, GeneratorError>;
}

/// System prompt steering the model toward the resolved tool dialect.
pub fn system_prompt(variant: ToolVariant) -> String {
    let binary = variant.binary();
    format!(
        "You are an expert ImageMagick assistant. Your job is to generate ImageMagick CLI commands based on user requests.\n\
         \n\
         Key guidelines:\n\
         1. Generate valid ImageMagick commands using the '{binary}' CLI tool\n\
         2. Always specify input and output file paths clearly\n\
         3. Use common ImageMagick operations: -resize, -crop, -rotate, -blur, -sharpen, -border, -colorspace, etc.\n\
         4. Respond with ONLY the command to execute, no explanations or markdown\n\
         5. If the user's request is unclear, ask for clarification\n\
         6. Consider the file format when choosing operations\n\
         7. Use appropriate output file names (e.g., output.png, resized.jpg, etc.)\n\
         \n\
         Example commands:\n\
         - Resize: {binary} input.jpg -resize 800x600 output.jpg\n\
         - Add border: {binary} input.jpg -bordercolor black -border 10 output.jpg\n\
         - Rotate: {binary} input.jpg -rotate 90 output.jpg\n\
         - Convert format: {binary} input.jpg output.png\n\
         - Blur: {binary} input.jpg -blur 0x8 output.jpg\n\
         - Compose images: {binary} background.jpg logo.png -gravity center -composite output.jpg\n\
         \n\
         The user will provide image file paths and describe what they want to do."
    )
}

/// Build the configured provider's generator. The API key comes from the
/// provider's environment variable, never from the config file.
pub fn create_generator(
    config: &LlmConfig,
    variant: ToolVariant,
) -> Result<Box<dyn CommandGenerator>, GeneratorError> {
    let key_env = config.provider.api_key_env();
    let api_key =
        std::env::var(key_env).map_err(|_| GeneratorError::MissingApiKey(key_env))?;
    let prompt = system_prompt(variant);

    Ok(match config.provider {
        LlmProvider::Anthropic => Box::new(AnthropicGenerator::new(
            api_key,
            config.model.clone(),
            config.max_tokens,
            prompt,
        )),
        LlmProvider::OpenAi => Box::new(OpenAiGenerator::new(
            api_key,
            config.model.clone(),
            config.max_tokens,
            prompt,
        )),
    })
}
