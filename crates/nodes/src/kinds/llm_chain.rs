//! `basicLLMChain` — the heart of the engine (spec §4.3).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::kinds::model_provider;
use crate::models::{ExecutionResult, ExecutionStats, Node};
use crate::providers::{
    ChatMessage, ProviderDispatcher, ProviderFamily, ProviderRequest, ProviderResponse,
    SamplingParams,
};
use crate::retry::{with_retry, RetryEnvelope};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::NodeError;

/// Generic placeholder labels that never get used as the auto-published
/// variable name (spec §4.3 step 5).
fn is_generic_label(label: &str) -> bool {
    label == "Basic LLM Chain" || label == "localhost" || label.starts_with("LLM Chain")
}

/// Derive the variable name an `LLMChain`'s response auto-publishes under.
pub fn variable_name(label: Option<&str>, node_id: &str) -> String {
    match label {
        Some(l) if !l.is_empty() && !is_generic_label(l) => l.to_string(),
        _ => {
            let base = label.filter(|l| !l.is_empty()).unwrap_or("llm_output");
            let suffix: String = node_id.chars().rev().take(6).collect::<String>().chars().rev().collect();
            format!("{base}_{suffix}")
        }
    }
}

/// Merge consecutive `role == "user"` messages by joining their contents
/// with exactly ten newlines (spec §4.3 step 2, testable property 9).
pub fn merge_consecutive_user_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == "user" {
            if let Some(last) = out.last_mut() {
                if last.role == "user" {
                    last.content.push_str(&"\n".repeat(10));
                    last.content.push_str(&msg.content);
                    continue;
                }
            }
        }
        out.push(msg);
    }
    out
}

fn build_sampling_params(config: &Value) -> SamplingParams {
    let mut params = SamplingParams::default();
    let get_f64 = |key: &str| config.get(key).and_then(Value::as_f64);
    let get_i64 = |key: &str| config.get(key).and_then(Value::as_i64);
    let get_bool = |key: &str| config.get(key).and_then(Value::as_bool).unwrap_or(false);

    params.temperature = get_f64("temperature");
    params.temperature_enabled = get_bool("temperatureEnabled");
    params.top_p = get_f64("topP");
    params.top_p_enabled = get_bool("topPEnabled");
    params.top_k = get_i64("topK");
    params.top_k_enabled = get_bool("topKEnabled");
    params.max_tokens = get_i64("maxTokens");
    params.max_tokens_enabled = get_bool("maxTokensEnabled");
    params.seed = get_i64("seed");
    params.seed_enabled = get_bool("seedEnabled");
    params.stops = config.get("stops").and_then(|v| v.as_array()).map(|a| {
        a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect()
    });
    params.stops_enabled = get_bool("stopsEnabled");
    params.presence_penalty = get_f64("presencePenalty");
    params.presence_penalty_enabled = get_bool("presencePenaltyEnabled");
    params.frequency_penalty = get_f64("frequencyPenalty");
    params.frequency_penalty_enabled = get_bool("frequencyPenaltyEnabled");
    params.reasoning_effort = config.get("reasoningEffort").and_then(Value::as_str).map(str::to_string);
    params.reasoning_effort_enabled = get_bool("reasoningEffortEnabled");
    params
}

pub struct LlmChainNode {
    dispatcher: Arc<dyn ProviderDispatcher>,
}

impl LlmChainNode {
    pub fn new(dispatcher: Arc<dyn ProviderDispatcher>) -> Self {
        Self { dispatcher }
    }

    fn find_provider(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<Node, NodeError> {
        let group = node.config.get("modelGroup").and_then(Value::as_i64);
        let Some(group) = group else {
            return Err(NodeError::Fatal("LLMChain has no modelGroup configured".into()));
        };

        let provider_node = ctx
            .nodes()
            .into_iter()
            .find(|n| {
                n.kind == "modelProvider" && n.config.get("groupId").and_then(Value::as_i64) == Some(group)
            })
            .ok_or_else(|| {
                NodeError::Fatal(format!("no ModelProvider found for modelGroup {group}"))
            })?;

        model_provider::validate(&provider_node.config)?;
        Ok(provider_node)
    }

    async fn dispatch_once(
        &self,
        provider_node: &Node,
        messages: Vec<ChatMessage>,
    ) -> Result<ProviderResponse, NodeError> {
        let config = &provider_node.config;
        let family = ProviderFamily::from_str(config.get("provider").and_then(Value::as_str).unwrap_or(""));
        let model = config.get("model").and_then(Value::as_str).unwrap_or("").to_string();

        let request = ProviderRequest {
            family,
            base_url: config.get("baseURL").and_then(Value::as_str).map(str::to_string),
            api_key: config.get("apiKey").and_then(Value::as_str).map(str::to_string),
            oauth_token: config.get("oauthToken").and_then(Value::as_str).map(str::to_string),
            model,
            messages,
            params: build_sampling_params(config),
        };

        self.dispatcher.dispatch(request).await
    }
}

#[async_trait]
impl ExecutableNode for LlmChainNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == "basicLLMChain"
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        if node.is_executing() {
            return Ok(());
        }
        ctx.update_node_data(&node.id, json!({"isExecuting": true}));

        let started = Instant::now();
        let outcome = self.run(node, ctx).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        ctx.update_node_data(&node.id, json!({"isExecuting": false}));

        let mut delta = HashMap::new();
        match outcome {
            Ok((response, stats)) => {
                delta.insert(
                    node.id.clone(),
                    ExecutionResult::ok_with_stats(response.clone(), duration_ms, stats),
                );
                ctx.set_results(delta);
                ctx.update_node_data(
                    &node.id,
                    json!({"lastResponse": response.get("response").cloned().unwrap_or(Value::Null)}),
                );
                Ok(())
            }
            Err(err) => {
                delta.insert(node.id.clone(), ExecutionResult::fail(err.to_string(), duration_ms));
                ctx.set_results(delta);
                ctx.update_node_data(&node.id, json!({"lastError": err.to_string()}));
                Err(err)
            }
        }
    }
}

impl LlmChainNode {
    async fn run(
        &self,
        node: &Node,
        ctx: &dyn ExecutionContext,
    ) -> Result<(Value, ExecutionStats), NodeError> {
        let provider_node = self.find_provider(node, ctx)?;

        let raw_messages: Vec<ChatMessage> = node
            .config
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let role = m.get("role").and_then(Value::as_str)?.to_string();
                        let content = m.get("content").and_then(Value::as_str).unwrap_or("");
                        let content = ctx.interpolate(content);
                        Some(ChatMessage { role, content })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let messages = merge_consecutive_user_messages(raw_messages);

        let node_id = node.id.clone();
        let response = with_retry(&node_id, RetryEnvelope::llm(), || {
            let provider_node = provider_node.clone();
            let messages = messages.clone();
            async move { self.dispatch_once(&provider_node, messages).await }
        })
        .await?;

        let stats = ExecutionStats {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            total_tokens: response.total_tokens,
            timestamp: Utc::now(),
        };

        let output = json!({
            "response": response.response,
            "thinking": response.thinking,
        });

        self.publish_variable(node, ctx, &response.response);

        Ok((output, stats))
    }

    fn publish_variable(&self, node: &Node, ctx: &dyn ExecutionContext, response: &str) {
        let name = variable_name(node.label.as_deref(), &node.id);
        let folder = ctx.variables().global(&name).and_then(|v| v.folder.clone());
        if ctx.variables().has_global(&name) {
            ctx.update_variable(&name, response);
        } else {
            ctx.add_variable(&name, response, None, folder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StandaloneContext;
    use crate::providers::FakeProviderDispatcher;
    use crate::variables::VariableStore;

    fn trigger_node(id: &str) -> Node {
        Node { id: id.into(), kind: "trigger".into(), label: None, config: Value::Null, data: json!({}) }
    }

    fn provider_node(group: i64) -> Node {
        Node {
            id: "provider".into(),
            kind: "modelProvider".into(),
            label: None,
            config: json!({"provider": "openai", "model": "gpt-4o", "groupId": group}),
            data: json!({}),
        }
    }

    fn chain_node(id: &str, group: i64, label: Option<&str>, user_content: &str) -> Node {
        Node {
            id: id.into(),
            kind: "basicLLMChain".into(),
            label: label.map(str::to_string),
            config: json!({
                "modelGroup": group,
                "messages": [{"id": "m1", "role": "user", "content": user_content}],
            }),
            data: json!({}),
        }
    }

    #[test]
    fn merges_consecutive_user_messages() {
        let messages = vec![
            ChatMessage { role: "user".into(), content: "a".into() },
            ChatMessage { role: "user".into(), content: "b".into() },
            ChatMessage { role: "assistant".into(), content: "c".into() },
        ];
        let merged = merge_consecutive_user_messages(messages);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, format!("a{}b", "\n".repeat(10)));
        assert_eq!(merged[1].role, "assistant");
    }

    #[test]
    fn variable_naming_uses_label_when_not_generic() {
        assert_eq!(variable_name(Some("greet"), "abcdef123456"), "greet");
    }

    #[test]
    fn variable_naming_synthesizes_for_generic_label() {
        let name = variable_name(Some("Basic LLM Chain"), "abcdef123456");
        assert_eq!(name, "Basic LLM Chain_123456");
    }

    #[test]
    fn variable_naming_falls_back_to_llm_output() {
        let name = variable_name(None, "abcdef123456");
        assert_eq!(name, "llm_output_123456");
    }

    #[tokio::test]
    async fn scenario_s1_trivial_chain() {
        let t = trigger_node("T");
        let p = provider_node(1);
        let l = chain_node("L", 1, Some("greet"), "Say hi to {{name}}");

        let mut vars = VariableStore::new();
        vars.upsert_global("name", "Ada", None, None);

        let ctx = StandaloneContext::new(vec![t, p, l.clone()], vec![], vars);
        let dispatcher = Arc::new(FakeProviderDispatcher::always_ok("USER: SAY HI TO ADA"));
        let node = LlmChainNode::new(dispatcher);

        node.execute(&l, &ctx).await.unwrap();

        let result = ctx.result("L").unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["response"], "USER: SAY HI TO ADA");
        assert_eq!(ctx.variables().global("greet").unwrap().value, "USER: SAY HI TO ADA");
    }

    #[tokio::test]
    async fn fails_fatally_when_no_provider_for_group() {
        let l = chain_node("L", 99, None, "hi");
        let ctx = StandaloneContext::new(vec![l.clone()], vec![], VariableStore::new());
        let dispatcher = Arc::new(FakeProviderDispatcher::always_ok("unused"));
        let node = LlmChainNode::new(dispatcher);

        let err = node.execute(&l, &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let p = provider_node(1);
        let l = chain_node("L", 1, Some("out"), "hi");
        let ctx = StandaloneContext::new(vec![p, l.clone()], vec![], VariableStore::new());
        let dispatcher = Arc::new(FakeProviderDispatcher::fail_n_then_ok(
            2,
            "503 service unavailable",
            "ok after retries",
        ));
        let node = LlmChainNode::new(dispatcher);

        node.execute(&l, &ctx).await.unwrap();
        let result = ctx.result("L").unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn permanent_provider_error_fails_once() {
        let p = provider_node(1);
        let l = chain_node("L", 1, Some("out"), "hi");
        let ctx = StandaloneContext::new(vec![p, l.clone()], vec![], VariableStore::new());
        let dispatcher = Arc::new(FakeProviderDispatcher::always_retryable("401 unauthorized"));
        let node = LlmChainNode::new(dispatcher.clone());

        let err = node.execute(&l, &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
        assert_eq!(dispatcher.call_count(), 1);
    }
}
