//! `RetryPolicy` — classify, back off, cap (spec §4.4).
//!
//! A small combinator around any async thunk. `LLMChain` and
//! `OutputSender` each wrap their network effect in [`with_retry`] with a
//! different [`RetryEnvelope`]; the classification rules and give-up
//! behaviour are shared.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::NodeError;

const TRANSIENT_PATTERNS: &[&str] = &[
    "network error",
    "connection reset",
    "connection refused",
    "econnreset",
    "502",
    "503",
    "504",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "rate limit",
    "too many requests",
    "429",
    "timeout",
    "timed out",
    "dns",
    "fetch failed",
    "model overloaded",
    "iam token",
    "iam-token",
];

const PERMANENT_PATTERNS: &[&str] = &[
    "401",
    "403",
    "404",
    "405",
    "400",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "model not found",
    "validation error",
    "validation failed",
];

/// Whether an error should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
}

/// Classify an error message by substring membership (spec §4.4).
/// Unclassified messages are treated as permanent — fail-stop, not
/// retry-forever.
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();

    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Classification::Permanent;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Classification::Transient;
    }
    Classification::Permanent
}

/// The numeric envelope bounding one kind's retry behaviour.
#[derive(Debug, Clone, Copy)]
pub struct RetryEnvelope {
    pub base: Duration,
    pub max: Duration,
    pub wall_clock_cap: Duration,
    pub max_attempts: u32,
}

impl RetryEnvelope {
    /// LLM dispatch envelope: base=1s, max=30s/step, 5 min wall clock, 20 attempts.
    pub fn llm() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            wall_clock_cap: Duration::from_secs(5 * 60),
            max_attempts: 20,
        }
    }

    /// HTTP sender envelope: base=1s, max=30s, 3 attempts total.
    pub fn http_sender() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            wall_clock_cap: Duration::from_secs(3 * 30),
            max_attempts: 3,
        }
    }
}

/// Backoff for attempt `n` (0-indexed): `min(max, base * 2^n)` plus
/// uniform jitter within ±15% of that capped value, floored at zero.
fn backoff_delay(envelope: &RetryEnvelope, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let raw = envelope.base.saturating_mul(exp as u32);
    let capped = raw.min(envelope.max);

    let jitter_pct = 0.15;
    let capped_ms = capped.as_millis() as f64;
    let jitter_span = capped_ms * jitter_pct;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let final_ms = (capped_ms + jitter).max(0.0);

    Duration::from_millis(final_ms as u64)
}

/// Run `op` with retry, classification, backoff, and caps. `node_id` is
/// only used to build the synthetic give-up error message.
pub async fn with_retry<F, Fut, T>(
    node_id: &str,
    envelope: RetryEnvelope,
    op: F,
) -> Result<T, NodeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt: u32 = 0;
    let mut last_message = String::new();

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(NodeError::Fatal(msg)) => return Err(NodeError::Fatal(msg)),
            Err(NodeError::Retryable(msg)) => {
                last_message = msg.clone();

                if classify(&msg) == Classification::Permanent {
                    return Err(NodeError::Fatal(msg));
                }

                attempt += 1;
                if attempt >= envelope.max_attempts || start.elapsed() >= envelope.wall_clock_cap {
                    break;
                }

                let delay = backoff_delay(&envelope, attempt - 1);
                warn!(
                    node_id,
                    attempt, max_attempts = envelope.max_attempts, ?delay, "retrying after transient error: {msg}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(NodeError::Fatal(format!(
        "node '{node_id}' exhausted retries after {attempt} attempts: {last_message}"
    )))
}
