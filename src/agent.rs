//! Agent Orchestration
//!
//! Conversation-level glue between the command generator and the validation
//! engine. The agent keeps a trimmed history, detects when the model asked a
//! question instead of producing a command, and drives candidates through
//! the engine. It holds no safety logic of its own; everything the generator
//! emits is treated as untrusted and handed to the engine.

use crate::audit::CorrelationId;
use crate::config::Config;
use crate::engine::{Engine, ExecutionOutcome, SanitizedCommand, ValidationVerdict};
use crate::llm::{ChatMessage, CommandGenerator, GeneratorError};
use tracing::{debug, info};

/// Phrases suggesting the model asked for clarification instead of emitting
/// a command.
const CLARIFICATION_INDICATORS: [&str; 6] =
    ["?", "could you", "please specify", "which", "what", "unclear"];

/// Result of processing one user request.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// A validated command, ready to execute (pending confirmation)
    Command {
        correlation_id: CorrelationId,
        command: SanitizedCommand,
        needs_confirmation: bool,
    },
    /// The model asked a follow-up question instead
    Clarification(String),
    /// The generated candidate failed validation
    Rejected {
        correlation_id: CorrelationId,
        candidate: String,
        verdict: ValidationVerdict,
    },
}

/// Conversational agent wiring generator, engine, and history together.
pub struct Agent {
    engine: Engine,
    generator: Box<dyn CommandGenerator>,
    history: Vec<ChatMessage>,
    max_history: usize,
    auto_execute: bool,
    session_id: uuid::Uuid,
}

impl Agent {
    pub fn new(config: &Config, engine: Engine, generator: Box<dyn CommandGenerator>) -> Self {
        let session_id = uuid::Uuid::new_v4();
        info!(%session_id, variant = %engine.variant(), "agent session started");
        Self {
            engine,
            generator,
            history: Vec::new(),
            max_history: config.agent.max_history,
            auto_execute: config.agent.auto_execute,
            session_id,
        }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Process a natural-language request: generate a candidate, record the
    /// exchange, and validate. Never executes; execution is a separate step
    /// so the caller can gate it on confirmation.
    pub async fn process_request(
        &mut self,
        user_input: &str,
    ) -> Result<ProcessOutcome, GeneratorError> {
        let candidate = self.generator.generate(user_input, &self.history).await?;

        self.push_history(ChatMessage::user(user_input));
        self.push_history(ChatMessage::assistant(&candidate));

        if is_clarification(&candidate) {
            debug!(session = %self.session_id, "generator asked for clarification");
            return Ok(ProcessOutcome::Clarification(candidate));
        }

        let correlation_id = CorrelationId::new();
        let verdict = self.engine.validate(correlation_id, &candidate);

        match verdict.sanitized().cloned() {
            Some(command) => Ok(ProcessOutcome::Command {
                correlation_id,
                command,
                needs_confirmation: !self.auto_execute,
            }),
            None => Ok(ProcessOutcome::Rejected {
                correlation_id,
                candidate,
                verdict,
            }),
        }
    }

    /// Execute a previously validated command under its correlation id.
    pub async fn execute(
        &self,
        correlation_id: CorrelationId,
        command: &SanitizedCommand,
    ) -> ExecutionOutcome {
        self.engine.run(correlation_id, command).await
    }

    /// Inspect an image by driving `identify` through the normal engine
    /// pipeline. Returns the tool's stdout on success.
    pub async fn image_info(&self, file_path: &str) -> Option<String> {
        let attempt = self.engine.attempt(&format!("identify {file_path}")).await;
        match attempt.execution {
            Some(outcome) if outcome.success => Some(outcome.stdout.trim().to_string()),
            _ => None,
        }
    }

    /// Clear the conversation history.
    pub fn reset(&mut self) {
        self.history.clear();
        info!(session = %self.session_id, "conversation history cleared");
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn push_history(&mut self, message: ChatMessage) {
        self.history.push(message);
        // Each turn is a user/assistant pair; keep the most recent turns.
        let cap = self.max_history * 2;
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }
}

/// Heuristic for "the model asked a question instead of emitting a command".
fn is_clarification(candidate: &str) -> bool {
    let lowered = candidate.to_lowercase();
    CLARIFICATION_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}
