//! Real `ProviderDispatcher` over HTTP via `reqwest`.
//!
//! Request bodies follow each family's public chat-completions shape
//! closely enough to round-trip the fields spec §4.3 cares about;
//! anything provider-specific beyond that (function calling, vision,
//! …) is out of scope.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::providers::{
    extract_thinking, ProviderDispatcher, ProviderFamily, ProviderRequest, ProviderResponse,
};
use crate::NodeError;

pub struct HttpProviderDispatcher {
    client: reqwest::Client,
}

impl Default for HttpProviderDispatcher {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl HttpProviderDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_body(&self, req: &ProviderRequest) -> Value {
        let is_o1 = crate::providers::SamplingParams::is_o1_family(&req.model);
        let mut body = json!({
            "model": req.model,
            "messages": req.messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        });
        let obj = body.as_object_mut().unwrap();

        let p = &req.params;
        if !is_o1 {
            if p.temperature_enabled {
                if let Some(v) = p.temperature {
                    obj.insert("temperature".into(), json!(v));
                }
            }
            if p.top_p_enabled {
                if let Some(v) = p.top_p {
                    obj.insert("top_p".into(), json!(v));
                }
            }
            if p.presence_penalty_enabled {
                if let Some(v) = p.presence_penalty {
                    obj.insert("presence_penalty".into(), json!(v));
                }
            }
            if p.frequency_penalty_enabled {
                if let Some(v) = p.frequency_penalty {
                    obj.insert("frequency_penalty".into(), json!(v));
                }
            }
        }
        if p.top_k_enabled {
            if let Some(v) = p.top_k {
                obj.insert("top_k".into(), json!(v));
            }
        }
        if p.max_tokens_enabled {
            if let Some(v) = p.max_tokens {
                obj.insert("max_tokens".into(), json!(v));
            }
        }
        if p.seed_enabled {
            if let Some(v) = p.seed {
                obj.insert("seed".into(), json!(v));
            }
        }
        if p.stops_enabled {
            if let Some(v) = &p.stops {
                obj.insert("stop".into(), json!(v));
            }
        }
        if p.reasoning_effort_enabled && is_o1 {
            if let Some(v) = &p.reasoning_effort {
                obj.insert("reasoning_effort".into(), json!(v));
            }
        }

        body
    }

    fn endpoint(&self, req: &ProviderRequest) -> String {
        let base = req.base_url.clone().unwrap_or_else(|| match req.family {
            ProviderFamily::Openai => "https://api.openai.com".to_string(),
            ProviderFamily::Lmstudio => "http://localhost:1234".to_string(),
            ProviderFamily::Yandex => "https://llm.api.cloud.yandex.net".to_string(),
            ProviderFamily::Ollama => "http://localhost:11434".to_string(),
            ProviderFamily::Anthropic => "https://api.anthropic.com".to_string(),
        });
        match req.family {
            ProviderFamily::Ollama => format!("{base}/api/chat"),
            ProviderFamily::Yandex => format!("{base}/foundationModels/v1/completion"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }
}

#[async_trait]
impl ProviderDispatcher for HttpProviderDispatcher {
    async fn dispatch(&self, req: ProviderRequest) -> Result<ProviderResponse, NodeError> {
        let url = self.endpoint(&req);
        let body = self.build_body(&req);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &req.oauth_token {
            builder = builder.bearer_auth(token);
        } else if let Some(key) = &req.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| {
            NodeError::Retryable(format!("network error calling provider: {e}"))
        })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let msg = format!("{} {}", status.as_u16(), text);
            return Err(NodeError::Retryable(msg));
        }

        parse_response(req.family, &text)
    }
}

fn parse_response(family: ProviderFamily, text: &str) -> Result<ProviderResponse, NodeError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| NodeError::Fatal(format!("invalid provider response JSON: {e}")))?;

    let (content, native_thinking) = match family {
        ProviderFamily::Yandex => {
            let content = value
                .pointer("/result/alternatives/0/message/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let thinking = value
                .pointer("/result/alternatives/0/message/reasoning_content")
                .and_then(Value::as_str)
                .map(str::to_string);
            (content, thinking)
        }
        ProviderFamily::Ollama => {
            let content = value
                .pointer("/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (content, None)
        }
        _ => {
            let content = value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (content, None)
        }
    };

    let (response, extracted_thinking) = if native_thinking.is_some() {
        (content, native_thinking)
    } else {
        extract_thinking(&content)
    };

    let usage = value.get("usage").cloned().unwrap_or(Value::Null);
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64);
    let completion_tokens = usage.get("completion_tokens").and_then(Value::as_u64);
    let total_tokens = usage.get("total_tokens").and_then(Value::as_u64);

    Ok(ProviderResponse {
        response,
        thinking: extracted_thinking,
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}
