//! `outputSender` — publishes final reports in batch or HTTP mode (spec §4.3, §6).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{ExecutionResult, Node};
use crate::retry::{with_retry, RetryEnvelope};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::variables::VariableStore;
use crate::NodeError;

/// The pluggable network effect for HTTP-mode dispatch. Real deployments
/// PATCH the configured job endpoint over `reqwest`; tests inject a fake
/// so the network is never touched.
#[async_trait]
pub trait ReportDispatcher: Send + Sync {
    async fn patch_job(&self, url: &str, secret: &str, body: Value) -> Result<(), NodeError>;
}

/// Real `ReportDispatcher` over HTTP via `reqwest`.
pub struct HttpReportDispatcher {
    client: reqwest::Client,
}

impl Default for HttpReportDispatcher {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl HttpReportDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportDispatcher for HttpReportDispatcher {
    async fn patch_job(&self, url: &str, secret: &str, body: Value) -> Result<(), NodeError> {
        let resp = self
            .client
            .patch(url)
            .header("x-backend-secret", secret)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NodeError::Retryable(format!("network error calling job endpoint: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(NodeError::Retryable(format!("{} {}", status.as_u16(), text)));
        }
        Ok(())
    }
}

/// Map a report's display name to the fixed filename table (spec §4.3),
/// falling back to a slugified `<name>.md`.
fn filename_for(display_name: &str) -> String {
    match display_name {
        "Adapted Report" => "adapted.md".to_string(),
        "Professional Report" => "professional.md".to_string(),
        "Aggregate Score Profile" => "scores.md".to_string(),
        other => format!("{}.md", slugify(other)),
    }
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn lookup_var(vars: &VariableStore, name: &str) -> Option<String> {
    vars.get(name).map(|v| v.value.clone())
}

pub struct OutputSenderNode {
    dispatcher: Arc<dyn ReportDispatcher>,
}

impl OutputSenderNode {
    pub fn new(dispatcher: Arc<dyn ReportDispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn run(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<Value, NodeError> {
        let config = node.config.get("config").cloned().unwrap_or(Value::Null);
        let mapping = node.config.get("mapping").cloned().unwrap_or(Value::Null);

        let auto_send = config.get("autoSend").and_then(Value::as_bool).unwrap_or(true);
        if !auto_send {
            return Ok(json!({"status": "disabled"}));
        }

        let vars = ctx.variables();
        let reports_map = mapping.get("reports").and_then(Value::as_object).cloned().unwrap_or_default();

        let batch_id = lookup_var(&vars, "batch_id");
        let output_dir = lookup_var(&vars, "output_dir");

        if let (Some(_batch_id), Some(output_dir)) = (&batch_id, &output_dir) {
            self.run_batch(&vars, &reports_map, output_dir).await
        } else {
            self.run_http(&vars, &config, &mapping, &reports_map).await
        }
    }

    async fn run_batch(
        &self,
        vars: &VariableStore,
        reports_map: &Map<String, Value>,
        output_dir: &str,
    ) -> Result<Value, NodeError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| NodeError::Fatal(format!("cannot create output_dir '{output_dir}': {e}")))?;

        let mut saved_files = Vec::new();
        for (display_name, var_name) in reports_map {
            let Some(var_name) = var_name.as_str() else { continue };
            let Some(content) = lookup_var(vars, var_name) else { continue };

            let filename = filename_for(display_name);
            let path = std::path::Path::new(output_dir).join(&filename);
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| NodeError::Fatal(format!("cannot write report '{filename}': {e}")))?;
            saved_files.push(path.to_string_lossy().to_string());
        }

        Ok(json!({"mode": "batch", "savedFiles": saved_files}))
    }

    async fn run_http(
        &self,
        vars: &VariableStore,
        config: &Value,
        mapping: &Value,
        reports_map: &Map<String, Value>,
    ) -> Result<Value, NodeError> {
        let job_id_var = mapping.get("jobIdVariable").and_then(Value::as_str).unwrap_or("job_id");
        let status_var = mapping.get("statusVariable").and_then(Value::as_str).unwrap_or("job_status");

        let job_id = lookup_var(vars, job_id_var)
            .ok_or_else(|| NodeError::Fatal(format!("missing job id variable '{job_id_var}'")))?;
        let status = lookup_var(vars, status_var).unwrap_or_else(|| "completed".to_string());
        let session_id = lookup_var(vars, "session_id");

        let base_url = lookup_var(vars, "base_url")
            .ok_or_else(|| NodeError::Fatal("missing base_url variable".into()))?;
        let secret = lookup_var(vars, "backend_secret").unwrap_or_default();

        let mut body = Map::new();
        body.insert("jobId".into(), json!(job_id));
        if let Some(session_id) = session_id {
            body.insert("sessionId".into(), json!(session_id));
        }
        body.insert("status".into(), json!(status));
        body.insert("completedAt".into(), json!(Utc::now().to_rfc3339()));

        let include_reports = config.get("includeReports").and_then(Value::as_bool).unwrap_or(true);
        if include_reports && !reports_map.is_empty() {
            let mut reports = Map::new();
            for (display_name, var_name) in reports_map {
                let Some(var_name) = var_name.as_str() else { continue };
                if let Some(value) = lookup_var(vars, var_name) {
                    reports.insert(display_name.clone(), json!(value));
                }
            }
            body.insert("reports".into(), Value::Object(reports));
        }

        if let Some(custom_fields) = config.get("customFields").and_then(Value::as_array) {
            for field in custom_fields {
                let Some(field_name) = field.as_str() else { continue };
                if let Some(value) = lookup_var(vars, field_name) {
                    body.insert(field_name.to_string(), json!(value));
                }
            }
        }

        let url = format!("{}/api/external/jobs/{}", base_url.trim_end_matches('/'), job_id);
        let body = Value::Object(body);

        with_retry("output-sender", RetryEnvelope::http_sender(), || {
            let url = url.clone();
            let secret = secret.clone();
            let body = body.clone();
            async move { self.dispatcher.patch_job(&url, &secret, body).await }
        })
        .await?;

        Ok(json!({"mode": "http", "jobId": job_id, "status": status}))
    }
}

#[async_trait]
impl ExecutableNode for OutputSenderNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == "outputSender"
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
            Ok(output) => {
                delta.insert(node.id.clone(), ExecutionResult::ok(output, duration_ms));
                ctx.set_results(delta);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StandaloneContext;
    use serde_json::Value;

    struct FakeReportDispatcher {
        calls: std::sync::Mutex<Vec<Value>>,
        fail_times: std::sync::atomic::AtomicUsize,
    }

    impl FakeReportDispatcher {
        fn new(fail_times: usize) -> Self {
            Self { calls: std::sync::Mutex::new(Vec::new()), fail_times: std::sync::atomic::AtomicUsize::new(fail_times) }
        }
    }

    #[async_trait]
    impl ReportDispatcher for FakeReportDispatcher {
        async fn patch_job(&self, _url: &str, _secret: &str, body: Value) -> Result<(), NodeError> {
            self.calls.lock().unwrap().push(body);
            let remaining = self.fail_times.load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(NodeError::Retryable("503 service unavailable".into()));
            }
            Ok(())
        }
    }

    fn sender_node(config: Value) -> Node {
        Node { id: "out".into(), kind: "outputSender".into(), label: None, config, data: json!({}) }
    }

    #[tokio::test]
    async fn scenario_s5_batch_mode_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().to_string_lossy().to_string();

        let mut vars = VariableStore::new();
        vars.upsert_global("batch_id", "b1", None, None);
        vars.upsert_global("output_dir", &output_dir, None, None);
        vars.upsert_global("adapted_report", "# A", None, None);
        vars.upsert_global("professional_report", "# P", None, None);
        vars.upsert_global("aggregate_score_profile", "# S", None, None);

        let config = json!({
            "config": {"method": "batch", "autoSend": true},
            "mapping": {
                "reports": {
                    "Adapted Report": "adapted_report",
                    "Professional Report": "professional_report",
                    "Aggregate Score Profile": "aggregate_score_profile",
                }
            }
        });
        let node = sender_node(config);
        let ctx = StandaloneContext::new(vec![node.clone()], vec![], vars);

        let sender = OutputSenderNode::new(Arc::new(FakeReportDispatcher::new(0)));
        sender.execute(&node, &ctx).await.unwrap();

        let result = ctx.result("out").unwrap();
        assert!(result.success);
        let saved = result.output.unwrap()["savedFiles"].as_array().unwrap().len();
        assert_eq!(saved, 3);

        assert_eq!(std::fs::read_to_string(format!("{output_dir}/adapted.md")).unwrap(), "# A");
        assert_eq!(std::fs::read_to_string(format!("{output_dir}/professional.md")).unwrap(), "# P");
        assert_eq!(std::fs::read_to_string(format!("{output_dir}/scores.md")).unwrap(), "# S");
    }

    #[tokio::test]
    async fn http_mode_patches_job_endpoint() {
        let mut vars = VariableStore::new();
        vars.upsert_global("job_id", "job-1", None, None);
        vars.upsert_global("base_url", "https://backend.example", None, None);
        vars.upsert_global("backend_secret", "s3cr3t", None, None);

        let config = json!({
            "config": {"method": "http", "autoSend": true, "includeReports": false},
            "mapping": {"jobIdVariable": "job_id", "statusVariable": "job_status", "reports": {}},
        });
        let node = sender_node(config);
        let ctx = StandaloneContext::new(vec![node.clone()], vec![], vars);

        let dispatcher = Arc::new(FakeReportDispatcher::new(0));
        let sender = OutputSenderNode::new(dispatcher);
        sender.execute(&node, &ctx).await.unwrap();

        let result = ctx.result("out").unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["jobId"], "job-1");
    }

    #[tokio::test]
    async fn disabled_autosend_is_skipped() {
        let config = json!({"config": {"autoSend": false}, "mapping": {"reports": {}}});
        let node = sender_node(config);
        let ctx = StandaloneContext::new(vec![node.clone()], vec![], VariableStore::new());

        let sender = OutputSenderNode::new(Arc::new(FakeReportDispatcher::new(0)));
        sender.execute(&node, &ctx).await.unwrap();

        let result = ctx.result("out").unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["status"], "disabled");
    }
}
