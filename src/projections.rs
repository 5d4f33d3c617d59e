use crate::constants::SYSTEM_PREAMBLE;
use crate::specs::openai::ChatCompletionRequest;
use crate::types::{ConversationTurn, Role};

/// The two upstream model variants a request can be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub text: String,
    pub vision: String,
}

impl ModelCatalog {
    /// Any multi-part turn routes to the vision model. Pure and total.
    pub fn select(&self, turns: &[ConversationTurn]) -> &str {
        if turns.iter().any(|t| t.content.is_multipart()) {
            &self.vision
        } else {
            &self.text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

pub struct UpstreamProjection;

impl UpstreamProjection {
    /// Builds the outbound streaming request: persona preamble first, then the
    /// sanitized turns in order.
    pub fn project(
        turns: &[ConversationTurn],
        model: &str,
        params: SamplingParams,
    ) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ConversationTurn::text(Role::System, SYSTEM_PREAMBLE));
        messages.extend(turns.iter().cloned());

        ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: true,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        }
    }
}
