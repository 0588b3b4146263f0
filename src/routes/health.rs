//! Health, readiness and metrics endpoints.

use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" when every provider probe passes, "degraded" otherwise.
    pub status: &'static str,
    pub providers: BTreeMap<String, &'static str>,
    pub circuit_breakers: BTreeMap<String, &'static str>,
}

/// `GET /health` — parallel provider probes plus breaker states.
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let probe_timeout = state.config.server.health_probe_timeout;

    // Fan the probes out; each is individually bounded so one hung
    // backend cannot stall the endpoint.
    let probes = join_all(state.router.registry().iter().map(|provider| {
        let client = state.http_client.clone();
        let provider = provider.clone();
        async move {
            let id = provider.id().to_string();
            let result =
                tokio::time::timeout(probe_timeout, provider.health_check(&client)).await;
            let ok = match result {
                Ok(health) => health.ok,
                Err(_) => false,
            };
            (id, ok)
        }
    }))
    .await;

    let mut providers = BTreeMap::new();
    let mut all_ok = true;
    for (id, ok) in probes {
        if !ok {
            all_ok = false;
        }
        providers.insert(id, if ok { "ok" } else { "unhealthy" });
    }

    let mut circuit_breakers = BTreeMap::new();
    for (id, breaker_state) in state.router.breakers().states().await {
        circuit_breakers.insert(id, breaker_state.as_str());
    }

    Json(HealthStatus {
        status: if all_ok { "healthy" } else { "degraded" },
        providers,
        circuit_breakers,
    })
}

/// `GET /health/live` — process liveness, always ok.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/ready` — readiness with dependency probes.
///
/// Checks the shared store and the database when configured; 503 when any
/// probe fails so load balancers stop routing here.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut failures: Vec<String> = Vec::new();

    #[cfg(feature = "redis")]
    if let Some(redis) = &state.redis_cache
        && let Err(e) = redis.ping().await
    {
        failures.push(format!("redis: {e}"));
    }

    #[cfg(feature = "postgres")]
    if let Some(pool) = &state.db_pool
        && let Err(e) = sqlx::query("SELECT 1").execute(pool).await
    {
        failures.push(format!("database: {e}"));
    }

    if failures.is_empty() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        tracing::warn!(?failures, "readiness probe failing");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unready", "failures": failures })),
        )
    }
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            [("content-type", "text/plain")],
            "metrics are not enabled in this build".to_string(),
        )
            .into_response(),
    }
}
