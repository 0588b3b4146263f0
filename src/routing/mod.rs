//! Health-aware provider selection with ordered fallback.
//!
//! Selection order: explicit hint, then the model-prefix table, then the
//! preferred provider, then the fallback list. Every candidate is gated by
//! its circuit breaker. A hint names one provider explicitly, so a hint
//! whose breaker is open is an error, never a silent failover.

use std::sync::Arc;

use thiserror::Error;

use crate::{breaker::BreakerRegistry, providers::Provider};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no provider available")]
    NoProvider,

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("circuit open for provider '{0}'")]
    CircuitOpen(String),
}

/// Built-in model-prefix routing table.
fn provider_for_model(model: &str) -> Option<&'static str> {
    if model.starts_with("gpt-") || model.starts_with("o1-") || model.starts_with("o3-") {
        Some("openai")
    } else if model.starts_with("claude-") {
        Some("anthropic")
    } else {
        None
    }
}

/// Insertion-ordered provider registry.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Per-request routing preferences, usually taken from the tenant record.
/// Unset fields fall back to the router's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutePrefs<'a> {
    pub preferred: Option<&'a str>,
    pub fallback: Option<&'a [String]>,
}

pub struct ProviderRouter {
    registry: ProviderRegistry,
    breakers: Arc<BreakerRegistry>,
    preferred: Option<String>,
    fallback_order: Vec<String>,
}

impl ProviderRouter {
    /// Build a router. An empty `fallback_order` defaults to the
    /// registry's insertion order.
    pub fn new(
        registry: ProviderRegistry,
        breakers: Arc<BreakerRegistry>,
        preferred: Option<String>,
        fallback_order: Vec<String>,
    ) -> Self {
        let fallback_order = if fallback_order.is_empty() {
            registry.ids()
        } else {
            fallback_order
        };
        Self {
            registry,
            breakers,
            preferred,
            fallback_order,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    async fn admitted(&self, id: &str) -> bool {
        match self.breakers.get(id) {
            Some(breaker) => breaker.admit().await.is_ok(),
            None => true,
        }
    }

    /// Select the best provider for a request.
    pub async fn select(
        &self,
        hint: Option<&str>,
        model: &str,
        prefs: RoutePrefs<'_>,
    ) -> Result<Arc<dyn Provider>, RouteError> {
        // An explicit hint is honored or refused, never substituted.
        if let Some(hint) = hint {
            let provider = self
                .registry
                .get(hint)
                .ok_or_else(|| RouteError::UnknownProvider(hint.to_string()))?;
            if !self.admitted(hint).await {
                return Err(RouteError::CircuitOpen(hint.to_string()));
            }
            return Ok(provider);
        }

        if let Some(mapped) = provider_for_model(model)
            && let Some(provider) = self.registry.get(mapped)
            && self.admitted(mapped).await
        {
            return Ok(provider);
        }

        let preferred = prefs.preferred.or(self.preferred.as_deref());
        if let Some(preferred) = preferred
            && let Some(provider) = self.registry.get(preferred)
            && self.admitted(preferred).await
        {
            return Ok(provider);
        }

        let fallback = prefs
            .fallback
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.fallback_order);
        for id in fallback {
            if let Some(provider) = self.registry.get(id)
                && self.admitted(id).await
            {
                return Ok(provider);
            }
        }

        Err(RouteError::NoProvider)
    }

    /// Ordered candidate list: the best provider first, then every other
    /// breaker-admitted provider exactly once.
    pub async fn select_with_fallback(
        &self,
        hint: Option<&str>,
        model: &str,
        prefs: RoutePrefs<'_>,
    ) -> Result<Vec<Arc<dyn Provider>>, RouteError> {
        let head = self.select(hint, model, prefs).await?;

        let mut candidates = vec![Arc::clone(&head)];
        let fallback = prefs
            .fallback
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.fallback_order);

        for id in fallback {
            if candidates.iter().any(|p| p.id() == id.as_str()) {
                continue;
            }
            if let Some(provider) = self.registry.get(id)
                && self.admitted(id).await
            {
                candidates.push(provider);
            }
        }

        Ok(candidates)
    }

    pub async fn record_success(&self, provider_id: &str) {
        if let Some(breaker) = self.breakers.get(provider_id) {
            breaker.record_success().await;
        }
    }

    pub async fn record_failure(&self, provider_id: &str) {
        if let Some(breaker) = self.breakers.get(provider_id) {
            breaker.record_failure().await;
        }
    }
}
