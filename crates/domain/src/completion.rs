//! Provider-agnostic completion request/response types.
//!
//! Every adapter translates between these and its backend's wire format.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{Message, ToolCallRequest, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the model may use tools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides (the provider default).
    #[default]
    Auto,
    /// Never call tools.
    None,
    /// Must call at least one tool.
    Required,
    /// Must call this specific tool.
    Tool(String),
}

/// Response format directive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
    JsonSchema(serde_json::Value),
}

/// A provider-agnostic completion request.
///
/// All sampling parameters are optional; `None` defers to the provider
/// default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Target model identifier.
    pub model: String,
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// System prompt, held apart from `messages` so adapters can place it
    /// wherever their backend expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Number of completions to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    /// Tool definitions the model may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    /// Validate parameter ranges. Fails fast with a specific message.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::Configuration("model id must not be empty".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Configuration(format!(
                    "temperature must be in [0, 2], got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Configuration(format!(
                    "top_p must be in [0, 1], got {p}"
                )));
            }
        }
        if let Some(p) = self.presence_penalty {
            if !(-2.0..=2.0).contains(&p) {
                return Err(Error::Configuration(format!(
                    "presence_penalty must be in [-2, 2], got {p}"
                )));
            }
        }
        if let Some(p) = self.frequency_penalty {
            if !(-2.0..=2.0).contains(&p) {
                return Err(Error::Configuration(format!(
                    "frequency_penalty must be in [-2, 2], got {p}"
                )));
            }
        }
        if let Some(l) = self.top_logprobs {
            if l > 20 {
                return Err(Error::Configuration(format!(
                    "top_logprobs must be in [0, 20], got {l}"
                )));
            }
        }
        if let Some(m) = self.max_tokens {
            if m == 0 {
                return Err(Error::Configuration(
                    "max_tokens must be > 0 when set".into(),
                ));
            }
        }
        Ok(())
    }

    /// The text of the final user message, used for cache fingerprinting.
    pub fn final_user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User)
            .map(|m| m.content.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Refusal,
    Other,
}

impl FinishReason {
    /// Parse a provider-reported finish reason string.
    pub fn from_provider(s: &str) -> Self {
        match s {
            "stop" | "end_turn" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            "refusal" => FinishReason::Refusal,
            _ => FinishReason::Other,
        }
    }
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model, ids preserved verbatim.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub finish_reason: FinishReason,
    /// Refusal text when the provider declined to answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// The model that actually produced the response.
    pub model: String,
    /// Provider-assigned response id.
    pub id: String,
}

impl CompletionResponse {
    /// A minimal text-only response, used by mocks and health probes.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    #[test]
    fn default_request_validates() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn empty_model_rejected() {
        let mut req = request();
        req.model.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn temperature_range_enforced() {
        let mut req = request();
        req.temperature = Some(2.0);
        assert!(req.validate().is_ok());
        req.temperature = Some(2.1);
        assert!(req.validate().is_err());
        req.temperature = Some(-0.1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn top_p_and_penalty_ranges_enforced() {
        let mut req = request();
        req.top_p = Some(1.5);
        assert!(req.validate().is_err());
        req.top_p = Some(0.9);
        req.presence_penalty = Some(-2.5);
        assert!(req.validate().is_err());
        req.presence_penalty = Some(1.0);
        req.frequency_penalty = Some(3.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn max_tokens_zero_rejected() {
        let mut req = request();
        req.max_tokens = Some(0);
        assert!(req.validate().is_err());
        req.max_tokens = Some(1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn top_logprobs_capped_at_twenty() {
        let mut req = request();
        req.top_logprobs = Some(20);
        assert!(req.validate().is_ok());
        req.top_logprobs = Some(21);
        assert!(req.validate().is_err());
    }

    #[test]
    fn final_user_prompt_picks_last_user_message() {
        let mut req = request();
        req.messages = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ];
        assert_eq!(req.final_user_prompt(), Some("second"));
    }

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_provider("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_provider("weird"),
            FinishReason::Other
        );
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: 2,
        });
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cached_tokens: 0,
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.cached_tokens, 2);
    }
}
