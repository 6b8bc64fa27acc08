use clap::Parser;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::forwarder::{BackoffPolicy, RetryPolicy, UpstreamConfig};

// CLI argument structure, every option can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "bio-gateway")]
#[command(about = "Rate-limited, retrying gateway between the bio generator form and the upstream AI API")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream generation API endpoint
    #[arg(long, env = "RAPID_API_URL")]
    pub upstream_url: Option<String>,

    // Upstream API key
    #[arg(long, env = "RAPID_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // Routing host header expected by the upstream
    #[arg(long, env = "RAPID_API_HOST")]
    pub api_host: Option<String>,

    // Rate limit max requests per window
    #[arg(long, env = "RATE_LIMIT", default_value_t = 3)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 86_400)]
    pub rate_window: u64,

    // Per-attempt upstream deadline in milliseconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    // Attempts against the upstream, the first one included
    #[arg(long, env = "UPSTREAM_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    // Delay before the next attempt in milliseconds
    #[arg(long, env = "UPSTREAM_BACKOFF_MS", default_value_t = 1_000)]
    pub backoff_ms: u64,

    #[arg(long, env = "UPSTREAM_BACKOFF", value_enum, default_value_t = BackoffPolicy::Constant)]
    pub backoff: BackoffPolicy,

    // Shared rate table, in-memory when absent
    #[cfg(feature = "redis")]
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

impl Args {
    /// Startup checks. Missing credentials are a configuration error, not a panic.
    pub fn validate(&self) -> Result<()> {
        let url = required(&self.upstream_url, "RAPID_API_URL")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GatewayError::Config(format!(
                "RAPID_API_URL must be an http(s) URL, got {url}"
            )));
        }
        required(&self.api_key, "RAPID_API_KEY")?;

        if self.rate_limit == 0 {
            return Err(GatewayError::Config("RATE_LIMIT must be at least 1".to_string()));
        }
        if self.rate_window == 0 {
            return Err(GatewayError::Config("RATE_WINDOW must be at least 1 second".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(GatewayError::Config("UPSTREAM_TIMEOUT_MS must be positive".to_string()));
        }
        Ok(())
    }

    pub fn upstream(&self) -> Result<UpstreamConfig> {
        Ok(UpstreamConfig {
            url: required(&self.upstream_url, "RAPID_API_URL")?.to_string(),
            api_key: required(&self.api_key, "RAPID_API_KEY")?.to_string(),
            host: self.api_host.clone().filter(|h| !h.trim().is_empty()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
            policy: self.backoff,
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Config(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["bio-gateway"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_bio_form() {
        let args = parse(&["--upstream-url", "https://api.example.com/chat", "--api-key", "k"]);
        assert_eq!(args.rate_limit, 3);
        assert_eq!(args.rate_window(), Duration::from_secs(86_400));

        let policy = args.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(policy.policy, BackoffPolicy::Constant);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let mut args = parse(&["--upstream-url", "https://api.example.com/chat"]);
        args.api_key = None;
        let err = args.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Config(ref m) if m.contains("RAPID_API_KEY")));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut args = parse(&["--upstream-url", "ftp://api.example.com", "--api-key", "k"]);
        assert!(matches!(args.validate(), Err(GatewayError::Config(_))));

        args.upstream_url = Some("https://api.example.com".into());
        args.rate_limit = 0;
        assert!(matches!(args.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn exponential_backoff_is_selectable() {
        let args = parse(&[
            "--upstream-url",
            "https://api.example.com",
            "--api-key",
            "k",
            "--backoff",
            "exponential",
        ]);
        assert_eq!(args.retry_policy().policy, BackoffPolicy::Exponential);
    }

    #[test]
    fn blank_host_is_dropped() {
        let mut args = parse(&["--upstream-url", "https://api.example.com", "--api-key", "k"]);
        args.api_host = Some("  ".into());
        assert!(args.upstream().unwrap().host.is_none());
    }
}
