//! `FakeProviderDispatcher` — a programmable `ProviderDispatcher` test double.
//!
//! Tests configure canned responses/failures per call count so retry and
//! parsing behaviour can be exercised without touching the network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::providers::{ProviderDispatcher, ProviderRequest, ProviderResponse};
use crate::NodeError;

/// One scripted outcome for a single `dispatch` call.
pub enum FakeOutcome {
    Ok(ProviderResponse),
    Err(NodeError),
}

/// Replays a fixed script of outcomes, one per call; repeats the last
/// entry once the script is exhausted.
pub struct FakeProviderDispatcher {
    script: Mutex<Vec<FakeOutcome>>,
    calls: AtomicUsize,
}

impl FakeProviderDispatcher {
    pub fn new(script: Vec<FakeOutcome>) -> Self {
        Self { script: Mutex::new(script), calls: AtomicUsize::new(0) }
    }

    /// Always succeeds with a fixed response text.
    pub fn always_ok(response: impl Into<String>) -> Self {
        Self::new(vec![FakeOutcome::Ok(ProviderResponse {
            response: response.into(),
            ..Default::default()
        })])
    }

    /// Fails `times` times with `message` (retryable), then succeeds with `response`.
    pub fn fail_n_then_ok(times: usize, message: impl Into<String>, response: impl Into<String>) -> Self {
        let message = message.into();
        let mut script: Vec<FakeOutcome> =
            (0..times).map(|_| FakeOutcome::Err(NodeError::Retryable(message.clone()))).collect();
        script.push(FakeOutcome::Ok(ProviderResponse { response: response.into(), ..Default::default() }));
        Self::new(script)
    }

    /// Always fails with the given message, classified by the caller.
    pub fn always_retryable(message: impl Into<String>) -> Self {
        Self::new(vec![FakeOutcome::Err(NodeError::Retryable(message.into()))])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderDispatcher for FakeProviderDispatcher {
    async fn dispatch(&self, _request: ProviderRequest) -> Result<ProviderResponse, NodeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let idx = n.min(script.len() - 1);
        match &script[idx] {
            FakeOutcome::Ok(resp) => Ok(ProviderResponse {
                response: resp.response.clone(),
                thinking: resp.thinking.clone(),
                prompt_tokens: resp.prompt_tokens,
                completion_tokens: resp.completion_tokens,
                total_tokens: resp.total_tokens,
            }),
            FakeOutcome::Err(e) => Err(e.clone()),
        }
    }
}
