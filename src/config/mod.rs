//! Gateway configuration.
//!
//! Every knob is read from the environment (prefix `PALISADE_`) and every
//! optional knob degrades to a local in-process equivalent when unset:
//! no `PALISADE_REDIS_URL` means in-memory rate limiting, caching, breakers
//! and alert deduplication; no `PALISADE_DATABASE_URL` means the in-memory
//! tenant directory and usage ledger.

use std::{env, net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: String, message: String },
}

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub http_client: HttpClientConfig,
    pub providers: ProvidersConfig,
    pub cache: ResponseCachingConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub budget: BudgetConfig,
    /// Shared coordination store URL (`redis://…`). Unset ⇒ local backends.
    pub redis_url: Option<String>,
    /// Durable store URL (`postgres://…`). Unset ⇒ in-memory stores.
    pub database_url: Option<String>,
    /// OTLP collector endpoint. Accepted for deployment compatibility and
    /// logged at startup; span export is not wired in this build.
    pub otlp_endpoint: Option<String>,
    /// Use the shared (Redis-backed) circuit breaker variant when a
    /// coordination store is configured.
    pub shared_breakers: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// How long to wait for in-flight requests after the listener stops.
    pub drain_timeout: Duration,
    /// Hard deadline for the whole shutdown sequence.
    pub shutdown_timeout: Duration,
    /// Per-probe timeout for /health provider checks.
    pub health_probe_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            drain_timeout: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(30),
            health_probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `tracing` env-filter directive, e.g. `info` or `palisade=debug,info`.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Outbound HTTP client tuning.
///
/// One shared `reqwest::Client` serves every provider; reqwest keeps
/// per-host connection pools internally, so each provider endpoint gets its
/// own bounded pool and a slow backend cannot exhaust sockets globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 90,
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderEndpoint>,
    pub anthropic: Option<ProviderEndpoint>,
    /// OpenAI-compatible local inference server (vLLM, llama.cpp, …).
    pub local: Option<ProviderEndpoint>,
    /// Register the deterministic echo provider (development and tests).
    pub echo_enabled: bool,
    /// Provider used when neither a routing hint nor the model prefix
    /// resolves one.
    pub preferred: Option<String>,
    /// Ordered fallback list; defaults to registration order when empty.
    pub fallback_order: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResponseCachingConfig {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for ResponseCachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Fixed admission window. The wire contract (tenant limits, headers)
    /// is defined in requests per minute; overriding this is for tests.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that trip the breaker.
    pub failure_threshold: u32,
    /// Successes in HalfOpen that close it again.
    pub success_threshold: u32,
    /// How long an Open breaker rejects before probing.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// Month-to-date spend ratio that emits a Warning alert.
    pub warning_threshold: f64,
    /// Ratio that emits a Critical alert.
    pub critical_threshold: f64,
    /// Suppression window for repeated alerts of one (tenant, level).
    pub dedup_window: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.80,
            critical_threshold: 0.95,
            dedup_window: Duration::from_secs(3600),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log: LogConfig::default(),
            http_client: HttpClientConfig::default(),
            providers: ProvidersConfig::default(),
            cache: ResponseCachingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            budget: BudgetConfig::default(),
            redis_url: None,
            database_url: None,
            otlp_endpoint: None,
            shared_breakers: false,
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = var("PALISADE_LISTEN_ADDR") {
            config.server.listen_addr = parse_var("PALISADE_LISTEN_ADDR", &addr)?;
        }
        if let Some(secs) = var("PALISADE_DRAIN_TIMEOUT_SECS") {
            config.server.drain_timeout =
                Duration::from_secs(parse_var("PALISADE_DRAIN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = var("PALISADE_SHUTDOWN_TIMEOUT_SECS") {
            config.server.shutdown_timeout =
                Duration::from_secs(parse_var("PALISADE_SHUTDOWN_TIMEOUT_SECS", &secs)?);
        }

        if let Some(level) = var("PALISADE_LOG_LEVEL") {
            config.log.level = level;
        }
        config.log.json = flag("PALISADE_LOG_JSON", config.log.json)?;

        if let Some(secs) = var("PALISADE_HTTP_TIMEOUT_SECS") {
            config.http_client.timeout_secs = parse_var("PALISADE_HTTP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(n) = var("PALISADE_HTTP_POOL_MAX_IDLE_PER_HOST") {
            config.http_client.pool_max_idle_per_host =
                parse_var("PALISADE_HTTP_POOL_MAX_IDLE_PER_HOST", &n)?;
        }

        // Hosted providers are registered only when a credential is present;
        // a bare base-URL override without one is almost always a mistake.
        if let Some(api_key) = var("PALISADE_OPENAI_API_KEY") {
            config.providers.openai = Some(ProviderEndpoint {
                base_url: var("PALISADE_OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                api_key: Some(api_key),
            });
        }
        if let Some(api_key) = var("PALISADE_ANTHROPIC_API_KEY") {
            config.providers.anthropic = Some(ProviderEndpoint {
                base_url: var("PALISADE_ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|| "https://api.anthropic.com".into()),
                api_key: Some(api_key),
            });
        }
        // The local inference server needs no credential.
        config.providers.local = var("PALISADE_LOCAL_BASE_URL").map(|base_url| ProviderEndpoint {
            base_url,
            api_key: var("PALISADE_LOCAL_API_KEY"),
        });
        config.providers.echo_enabled = flag("PALISADE_ECHO_PROVIDER", false)?;
        config.providers.preferred = var("PALISADE_PREFERRED_PROVIDER");
        if let Some(order) = var("PALISADE_FALLBACK_ORDER") {
            config.providers.fallback_order = order
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.cache.enabled = flag("PALISADE_CACHE_ENABLED", config.cache.enabled)?;
        if let Some(secs) = var("PALISADE_CACHE_TTL_SECS") {
            config.cache.ttl = Duration::from_secs(parse_var("PALISADE_CACHE_TTL_SECS", &secs)?);
        }

        if let Some(n) = var("PALISADE_BREAKER_FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold =
                parse_var("PALISADE_BREAKER_FAILURE_THRESHOLD", &n)?;
        }
        if let Some(n) = var("PALISADE_BREAKER_SUCCESS_THRESHOLD") {
            config.circuit_breaker.success_threshold =
                parse_var("PALISADE_BREAKER_SUCCESS_THRESHOLD", &n)?;
        }
        if let Some(secs) = var("PALISADE_BREAKER_OPEN_TIMEOUT_SECS") {
            config.circuit_breaker.open_timeout =
                Duration::from_secs(parse_var("PALISADE_BREAKER_OPEN_TIMEOUT_SECS", &secs)?);
        }

        if let Some(r) = var("PALISADE_BUDGET_WARNING_THRESHOLD") {
            config.budget.warning_threshold = parse_var("PALISADE_BUDGET_WARNING_THRESHOLD", &r)?;
        }
        if let Some(r) = var("PALISADE_BUDGET_CRITICAL_THRESHOLD") {
            config.budget.critical_threshold = parse_var("PALISADE_BUDGET_CRITICAL_THRESHOLD", &r)?;
        }
        if let Some(secs) = var("PALISADE_ALERT_DEDUP_WINDOW_SECS") {
            config.budget.dedup_window =
                Duration::from_secs(parse_var("PALISADE_ALERT_DEDUP_WINDOW_SECS", &secs)?);
        }

        config.redis_url = var("PALISADE_REDIS_URL");
        config.database_url = var("PALISADE_DATABASE_URL");
        config.otlp_endpoint = var("PALISADE_OTLP_ENDPOINT");
        config.shared_breakers = flag("PALISADE_SHARED_BREAKERS", false)?;

        Ok(config)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: name.to_string(),
        message: e.to_string(),
    })
}

fn flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                var: name.to_string(),
                message: format!("expected boolean, got '{other}'"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_only() {
        let config = GatewayConfig::default();
        assert!(config.redis_url.is_none());
        assert!(config.database_url.is_none());
        assert!(!config.shared_breakers);
        assert!(config.cache.enabled);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.budget.warning_threshold, 0.80);
        assert_eq!(config.budget.critical_threshold, 0.95);
    }

    #[test]
    fn unset_flag_keeps_default() {
        assert!(matches!(flag("PALISADE_TEST_FLAG_UNSET_XYZ", true), Ok(true)));
        assert!(matches!(
            flag("PALISADE_TEST_FLAG_UNSET_XYZ", false),
            Ok(false)
        ));
    }

    #[test]
    fn http_client_builds() {
        let config = HttpClientConfig::default();
        assert!(config.build_client().is_ok());
    }
}
