use chunkctx_core::traits::TokenCounter;
use chunkctx_core::types::{ChatTurn, Role};
use serde::{Deserialize, Serialize};

/// Assistant turns with this content are streaming placeholders, never prompt material.
pub const PLACEHOLDER_REPLY: &str = "Generating response...";

/// Context line used when nothing relevant was found.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

/// The messages sent to the language model for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptWindow {
    messages: Vec<ChatTurn>,
}

impl PromptWindow {
    /// System prompt, the last `window` history turns, then the user message.
    pub fn build(system_prompt: &str, history: &[ChatTurn], window: usize, query: &str, context: &str) -> Self {
        let start = history.len().saturating_sub(window);
        let mut messages = Vec::with_capacity(window + 2);
        if !system_prompt.is_empty() {
            messages.push(ChatTurn::system(system_prompt));
        }
        messages.extend(
            history[start..]
                .iter()
                .filter(|t| !(t.role == Role::Assistant && t.content == PLACEHOLDER_REPLY))
                .cloned(),
        );
        messages.push(ChatTurn::user(user_message(query, context)));
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatTurn] { &self.messages }

    pub fn token_count(&self, counter: &dyn TokenCounter) -> usize {
        self.messages.iter().map(|m| counter.count(&m.content)).sum()
    }
}

pub fn user_message(query: &str, context: &str) -> String {
    let context = if context.trim().is_empty() { NO_RELEVANT_INFORMATION } else { context };
    format!("{query}\n\n### Relevant Data:\n{context}")
}
