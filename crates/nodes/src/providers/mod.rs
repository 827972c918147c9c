//! Provider-specific request shaping and response parsing for
//! `LLMChain` (spec §4.3).
//!
//! The actual network call is injected behind [`ProviderDispatcher`] so
//! the engine has no hard-coded hosts (spec §6) and unit tests never
//! touch the network.

mod fake;
mod http;

pub use fake::FakeProviderDispatcher;
pub use http::HttpProviderDispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::NodeError;

/// One chat message as sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Which provider family to dispatch to. Each has its own request shape
/// and honors only the parameters the node config flags as enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Openai,
    Lmstudio,
    Yandex,
    Ollama,
    /// Falls through to the OpenAI-compatible shape (Anthropic is a
    /// configuration choice in `modelProvider`, but has no distinct wire
    /// shape defined by spec §4.3 — only the four named families do).
    Anthropic,
}

impl ProviderFamily {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Self::Openai,
            "lmstudio" => Self::Lmstudio,
            "yandex" => Self::Yandex,
            "ollama" => Self::Ollama,
            _ => Self::Anthropic,
        }
    }
}

/// Sampling/decoding parameters, each gated by its own `*_enabled` flag.
#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub temperature_enabled: bool,
    pub top_p: Option<f64>,
    pub top_p_enabled: bool,
    pub top_k: Option<i64>,
    pub top_k_enabled: bool,
    pub max_tokens: Option<i64>,
    pub max_tokens_enabled: bool,
    pub seed: Option<i64>,
    pub seed_enabled: bool,
    pub stops: Option<Vec<String>>,
    pub stops_enabled: bool,
    pub presence_penalty: Option<f64>,
    pub presence_penalty_enabled: bool,
    pub frequency_penalty: Option<f64>,
    pub frequency_penalty_enabled: bool,
    pub reasoning_effort: Option<String>,
    pub reasoning_effort_enabled: bool,
}

impl SamplingParams {
    /// "o1"-family models ignore temperature/top_p/presence/frequency
    /// regardless of their enabled flags (spec §4.3 step 3).
    pub fn is_o1_family(model: &str) -> bool {
        model.to_lowercase().starts_with("o1")
    }
}

/// A fully-shaped request ready to dispatch to one provider family.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub family: ProviderFamily,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub oauth_token: Option<String>,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: SamplingParams,
}

/// The shape every provider family's response is normalized into.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub response: String,
    pub thinking: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// The pluggable network effect. Real deployments use
/// [`HttpProviderDispatcher`]; tests inject [`FakeProviderDispatcher`].
#[async_trait]
pub trait ProviderDispatcher: Send + Sync {
    async fn dispatch(&self, request: ProviderRequest) -> Result<ProviderResponse, NodeError>;
}

/// Extract a "thinking"/reasoning trace from raw completion content,
/// trying the documented heuristics in order (spec §4.3 step 4).
pub fn extract_thinking(content: &str) -> (String, Option<String>) {
    for (open, close) in [("<reasoning>", "</reasoning>"), ("<thinking>", "</thinking>")] {
        if let Some(start) = content.find(open) {
            if let Some(end) = content[start..].find(close) {
                let thinking = content[start + open.len()..start + end].trim().to_string();
                let mut remainder = String::new();
                remainder.push_str(&content[..start]);
                remainder.push_str(&content[start + end + close.len()..]);
                return (remainder.trim().to_string(), Some(thinking));
            }
        }
    }

    for sep in ["\n---\n", "\n===\n"] {
        if let Some(idx) = content.find(sep) {
            let (first, rest) = content.split_at(idx);
            let rest = &rest[sep.len()..];
            // Heuristic: the longer, earlier section reads as reasoning
            // when it mentions reasoning-flavoured words.
            let lower_first = first.to_lowercase();
            if lower_first.contains("think") || lower_first.contains("reason") {
                return (rest.trim().to_string(), Some(first.trim().to_string()));
            }
        }
    }

    for prefix in ["thinking:", "reasoning:"] {
        let trimmed = content.trim_start();
        if trimmed.to_lowercase().starts_with(prefix) {
            if let Some(nl) = trimmed.find('\n') {
                let thinking = trimmed[prefix.len()..nl].trim().to_string();
                let rest = trimmed[nl + 1..].trim().to_string();
                return (rest, Some(thinking));
            }
        }
    }

    (content.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_reasoning_tag() {
        let (response, thinking) =
            extract_thinking("before <reasoning>because X</reasoning> after");
        assert_eq!(thinking.as_deref(), Some("because X"));
        assert_eq!(response, "before  after");
    }

    #[test]
    fn extracts_thinking_prefix() {
        let (response, thinking) = extract_thinking("thinking: step one\nthe final answer");
        assert_eq!(thinking.as_deref(), Some("step one"));
        assert_eq!(response, "the final answer");
    }

    #[test]
    fn no_markers_returns_none() {
        let (response, thinking) = extract_thinking("just a plain answer");
        assert_eq!(thinking, None);
        assert_eq!(response, "just a plain answer");
    }

    #[test]
    fn o1_family_detection() {
        assert!(SamplingParams::is_o1_family("o1-preview"));
        assert!(!SamplingParams::is_o1_family("gpt-4o"));
    }
}
