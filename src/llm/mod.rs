//! Completion boundary for the simulated-customer and feedback replies.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;

use crate::error::LlmError;

/// Single-shot completion: one user turn, one system instruction, one
/// reply. `Ok(None)` is the absence signal — the provider produced
/// nothing usable — and callers treat it like a failure. No retries.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        user_turn: &str,
        system_instruction: &str,
    ) -> Result<Option<String>, LlmError>;
}
