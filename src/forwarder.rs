//! Outbound call to the generation API: per-attempt timeout, retry with backoff,
//! and parsing of the answer into bio candidates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::error::{GatewayError, Result};
use crate::metrics::{UPSTREAM_ATTEMPTS, UPSTREAM_FAILURES};
use crate::models::{BioCandidates, GenerationRequest};

/// Upper bound for exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Where the upstream lives and how to authenticate. Read-only once built.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    #[default]
    Constant,
    /// Delay doubles after each failed attempt, up to [`MAX_BACKOFF`].
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Total attempts, the first one included.
    pub max_retries: u32,
    pub backoff: Duration,
    pub policy: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: Duration::from_secs(1),
            policy: BackoffPolicy::Constant,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after the `failed`-th attempt (1-based) before the next one.
    pub fn delay_after(&self, failed: u32) -> Duration {
        match self.policy {
            BackoffPolicy::Constant => self.backoff,
            BackoffPolicy::Exponential => {
                let factor = 1u32.checked_shl(failed.saturating_sub(1)).unwrap_or(u32::MAX);
                self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
            }
        }
    }
}

/// One in-flight upstream attempt, running as its own task.
///
/// Dropping the attempt aborts the task, which drops the live connection with it.
/// An abandoned attempt can therefore never deliver a result.
struct Attempt {
    handle: JoinHandle<Result<String>>,
}

impl Attempt {
    fn spawn<F>(call: F) -> Self
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(call),
        }
    }

    async fn finish_within(mut self, deadline: Duration) -> Result<String> {
        match timeout(deadline, &mut self.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(GatewayError::UpstreamTransport(format!(
                "attempt task ended abnormally: {join_err}"
            ))),
            Err(_) => Err(GatewayError::UpstreamTimeout(deadline)),
        }
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Forwards generation requests to the upstream API.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    upstream: Arc<UpstreamConfig>,
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, upstream: UpstreamConfig, policy: RetryPolicy) -> Self {
        Self {
            client,
            upstream: Arc::new(upstream),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls the upstream (with retries) and parses the answer.
    ///
    /// A payload that does not parse is returned as [`GatewayError::Parse`],
    /// and an envelope with `"status": false` as
    /// [`GatewayError::UpstreamRejected`], straight away; the call itself
    /// already succeeded.
    pub async fn forward(&self, request: GenerationRequest) -> Result<BioCandidates> {
        let body = self.call_with_retry(request).await?;
        BioCandidates::parse(&body).inspect_err(|err| {
            UPSTREAM_FAILURES.with_label_values(&[err.kind()]).inc();
        })
    }

    /// Raw upstream body of the first successful attempt.
    pub async fn call_with_retry(&self, request: GenerationRequest) -> Result<String> {
        let request = Arc::new(request);
        let attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            UPSTREAM_ATTEMPTS.inc();
            let call = Attempt::spawn(send_once(
                self.client.clone(),
                self.upstream.clone(),
                request.clone(),
            ));

            match call.finish_within(self.policy.timeout).await {
                Ok(body) => {
                    debug!(attempt, "upstream answered");
                    return Ok(body);
                }
                Err(err) => {
                    UPSTREAM_FAILURES.with_label_values(&[err.kind()]).inc();

                    if !err.is_retryable() || attempt >= attempts {
                        error!(attempt, attempts, %err, "upstream call failed");
                        return Err(err);
                    }

                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "upstream attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

async fn send_once(
    client: reqwest::Client,
    upstream: Arc<UpstreamConfig>,
    request: Arc<GenerationRequest>,
) -> Result<String> {
    let mut builder = client
        .post(&upstream.url)
        .header("X-RapidAPI-Key", &upstream.api_key)
        .json(request.as_ref());
    if let Some(host) = &upstream.host {
        builder = builder.header("X-RapidAPI-Host", host);
    }

    let res = builder
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
        return Err(GatewayError::UpstreamHttp {
            status: status.as_u16(),
        });
    }

    res.text()
        .await
        .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::advance;

    #[test]
    fn constant_backoff_never_grows() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(1000),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
    }

    #[test]
    fn exponential_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(500),
            policy: BackoffPolicy::Exponential,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
    }

    #[test]
    fn zero_retries_still_makes_one_attempt() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempt_is_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let attempt = Attempt::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok("late".to_string())
        });

        let err = attempt.finish_within(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout(d) if d == Duration::from_secs(1)));

        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn attempt_within_deadline_returns_outcome() {
        let attempt = Attempt::spawn(async { Ok("body".to_string()) });
        assert_eq!(attempt.finish_within(Duration::from_secs(1)).await.unwrap(), "body");
    }
}
