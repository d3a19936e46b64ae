//! Environment configuration for the dispatch worker and its clients.

use std::time::Duration;

use callmesh_core::RetryPolicy;

/// Runtime configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Global cap on concurrently in-flight calls (soft admission limit).
    pub max_concurrent_calls: usize,
    /// Retry budget and backoff for failed dispatch attempts.
    pub retry: RetryPolicy,
    /// Destination-lock TTL; the crash-safety net for a worker that dies
    /// between acquire and release.
    pub lock_ttl: Duration,
    /// Age past which an IN_PROGRESS record is considered stuck and
    /// reconciled by the sweep.
    pub stale_in_progress: Duration,
    /// Delay before re-offering a message deferred by the admission check.
    pub admission_retry_delay: Duration,
    /// External execution provider endpoint.
    pub provider_url: String,
    /// Base URL the provider calls back on (this service's public address).
    pub callback_base_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let lock_ttl = Duration::from_secs(300);
        Self {
            max_concurrent_calls: 30,
            retry: RetryPolicy::linear(3, Duration::from_secs(2)),
            lock_ttl,
            stale_in_progress: lock_ttl * 2,
            admission_retry_delay: Duration::from_secs(2),
            provider_url: "http://localhost:9090/provider".to_string(),
            callback_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Invalid values are logged and replaced by the default rather than
    /// aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_calls =
            env_parse("MAX_CONCURRENT_CALLS", defaults.max_concurrent_calls);
        let max_attempts = env_parse("MAX_CALL_ATTEMPTS", defaults.retry.max_attempts);
        let base_backoff_secs = env_parse("BASE_BACKOFF_SECS", 2u64);
        let lock_ttl = Duration::from_secs(env_parse("LOCK_TTL_SECS", 300u64));
        let stale_in_progress = Duration::from_secs(env_parse(
            "STALE_IN_PROGRESS_SECS",
            lock_ttl.as_secs() * 2,
        ));

        Self {
            max_concurrent_calls,
            retry: RetryPolicy::linear(max_attempts, Duration::from_secs(base_backoff_secs)),
            lock_ttl,
            stale_in_progress,
            admission_retry_delay: Duration::from_secs(base_backoff_secs),
            provider_url: std::env::var("PROVIDER_URL").unwrap_or(defaults.provider_url),
            callback_base_url: std::env::var("CALLBACK_BASE_URL")
                .unwrap_or(defaults.callback_base_url),
        }
    }

    /// Full callback URL handed to the provider with each dispatch.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/v1/callbacks/call-status",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
