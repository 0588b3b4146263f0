//! Gateway metrics.
//!
//! A `Metrics` handle is built once at startup and held by `AppState`;
//! subsystems receive it as an explicit collaborator rather than reaching
//! for a process-global registry. Recording goes through the `metrics`
//! facade whose recorder is installed by the same constructor, so a handle
//! built with [`Metrics::disabled`] (tests, `prometheus` feature off) makes
//! every recording call a no-op.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Clone)]
pub struct Metrics {
    #[cfg(feature = "prometheus")]
    handle: Option<Arc<PrometheusHandle>>,
    #[cfg(not(feature = "prometheus"))]
    _private: std::marker::PhantomData<Arc<()>>,
}

impl Metrics {
    /// Install the Prometheus recorder and return a recording handle.
    #[cfg(feature = "prometheus")]
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    pub fn install() -> Result<Self, MetricsError> {
        Ok(Self::disabled())
    }

    /// A handle that records nothing and renders nothing.
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "prometheus")]
            handle: None,
            #[cfg(not(feature = "prometheus"))]
            _private: std::marker::PhantomData,
        }
    }

    /// Render the Prometheus text exposition, if metrics are enabled.
    pub fn render(&self) -> Option<String> {
        #[cfg(feature = "prometheus")]
        {
            self.handle.as_ref().map(|h| h.render())
        }
        #[cfg(not(feature = "prometheus"))]
        {
            None
        }
    }

    fn enabled(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.handle.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }

    /// Record one handled HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        if !self.enabled() {
            return;
        }
        #[cfg(feature = "prometheus")]
        {
            let status_class = format!("{}xx", status / 100);
            metrics::counter!(
                "gateway_http_requests_total",
                "method" => method.to_string(),
                "path" => path.to_string(),
                "status" => status.to_string(),
            )
            .increment(1);
            metrics::histogram!(
                "gateway_http_request_duration_seconds",
                "method" => method.to_string(),
                "path" => path.to_string(),
                "status_class" => status_class,
            )
            .record(duration_secs);
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = (method, path, status, duration_secs);
    }

    /// Record one backend LLM call.
    pub fn record_llm_request(
        &self,
        provider: &str,
        model: &str,
        status: &str,
        duration_secs: f64,
        input_tokens: i64,
        output_tokens: i64,
    ) {
        if !self.enabled() {
            return;
        }
        #[cfg(feature = "prometheus")]
        {
            metrics::counter!(
                "gateway_llm_requests_total",
                "provider" => provider.to_string(),
                "model" => model.to_string(),
                "status" => status.to_string(),
            )
            .increment(1);
            metrics::histogram!(
                "gateway_llm_request_duration_seconds",
                "provider" => provider.to_string(),
                "model" => model.to_string(),
            )
            .record(duration_secs);
            if input_tokens > 0 {
                metrics::counter!(
                    "gateway_llm_tokens_total",
                    "provider" => provider.to_string(),
                    "model" => model.to_string(),
                    "direction" => "input",
                )
                .increment(input_tokens as u64);
            }
            if output_tokens > 0 {
                metrics::counter!(
                    "gateway_llm_tokens_total",
                    "provider" => provider.to_string(),
                    "model" => model.to_string(),
                    "direction" => "output",
                )
                .increment(output_tokens as u64);
            }
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = (provider, model, status, duration_secs, input_tokens, output_tokens);
    }

    /// Record a response-cache lookup outcome ("hit", "miss").
    pub fn record_cache_lookup(&self, outcome: &str) {
        if !self.enabled() {
            return;
        }
        #[cfg(feature = "prometheus")]
        metrics::counter!(
            "gateway_response_cache_lookups_total",
            "outcome" => outcome.to_string(),
        )
        .increment(1);
        #[cfg(not(feature = "prometheus"))]
        let _ = outcome;
    }

    /// Record a rate-limiter decision ("allowed", "limited").
    pub fn record_rate_limit(&self, outcome: &str) {
        if !self.enabled() {
            return;
        }
        #[cfg(feature = "prometheus")]
        metrics::counter!(
            "gateway_rate_limit_decisions_total",
            "outcome" => outcome.to_string(),
        )
        .increment(1);
        #[cfg(not(feature = "prometheus"))]
        let _ = outcome;
    }

    /// Record a budget alert emission.
    pub fn record_budget_alert(&self, level: &str) {
        if !self.enabled() {
            return;
        }
        #[cfg(feature = "prometheus")]
        metrics::counter!(
            "gateway_budget_alerts_total",
            "level" => level.to_string(),
        )
        .increment(1);
        #[cfg(not(feature = "prometheus"))]
        let _ = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_are_inert() {
        let metrics = Metrics::disabled();
        assert!(metrics.render().is_none());
        // Recording through a disabled handle must not panic.
        metrics.record_http_request("POST", "/v1/chat/completions", 200, 0.05);
        metrics.record_llm_request("openai", "gpt-4", "success", 0.5, 10, 20);
        metrics.record_cache_lookup("hit");
        metrics.record_rate_limit("allowed");
        metrics.record_budget_alert("warning");
    }
}
