//! palisade — a multi-tenant AI gateway.
//!
//! One OpenAI-compatible chat API in front of multiple LLM backends, with
//! per-tenant authentication, rate limits and budgets, a response cache,
//! and health-aware routing behind per-provider circuit breakers. Every
//! coordination subsystem has a local in-process backend and a shared
//! (Redis/Postgres) backend behind the same trait; the pipeline holds the
//! trait and never knows which is wired.

pub mod api_types;
pub mod breaker;
pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod pricing;
pub mod providers;
pub mod ratelimit;
pub mod routes;
pub mod routing;
pub mod streaming;
pub mod tenants;
pub mod usage;

use std::future::IntoFuture;
use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    breaker::{BreakerRegistry, CircuitBreaker, LocalBreaker},
    budget::{AlertDeduper, BudgetMonitor, LocalDeduper, LogAlertHandler},
    cache::{Cache, MemoryCache, ResponseCache},
    config::GatewayConfig,
    middleware::{
        ShutdownFlag, auth_middleware, http_metrics_middleware, request_id_middleware,
        shutdown_gate_middleware,
    },
    observability::Metrics,
    pricing::PricingTable,
    providers::{AnthropicProvider, EchoProvider, OpenAiProvider, Provider},
    ratelimit::{LocalRateLimiter, RateLimiter},
    routing::{ProviderRegistry, ProviderRouter},
    tenants::{MemoryTenantStore, TenantStore},
    usage::{MemoryLedger, UsageLedger},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the request pipeline needs, resolved once at startup.
/// Handlers receive this as the axum state; no subsystem is reachable
/// through process globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http_client: reqwest::Client,
    pub tenants: Arc<dyn TenantStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub router: Arc<ProviderRouter>,
    pub response_cache: Option<Arc<ResponseCache>>,
    pub pricing: Arc<PricingTable>,
    pub ledger: Arc<dyn UsageLedger>,
    pub budget: Arc<BudgetMonitor>,
    pub metrics: Metrics,
    pub task_tracker: TaskTracker,
    pub shutdown: ShutdownFlag,
    /// Shared-store handle kept for the readiness probe.
    #[cfg(feature = "redis")]
    pub redis_cache: Option<Arc<cache::RedisCache>>,
    /// Database handle kept for the readiness probe.
    #[cfg(feature = "postgres")]
    pub db_pool: Option<sqlx::PgPool>,
}

/// The swappable backends behind [`AppState`]. [`AppState::new`] chooses
/// shared or local variants from configuration; tests assemble local
/// parts directly.
pub struct AppParts {
    pub http_client: reqwest::Client,
    pub providers: Vec<Arc<dyn Provider>>,
    pub tenants: Arc<dyn TenantStore>,
    pub ledger: Arc<dyn UsageLedger>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub cache: Arc<dyn Cache>,
    pub dedup: Arc<dyn AlertDeduper>,
    pub breakers: Vec<(String, Arc<dyn CircuitBreaker>)>,
    pub task_tracker: TaskTracker,
    #[cfg(feature = "redis")]
    pub redis_cache: Option<Arc<cache::RedisCache>>,
    #[cfg(feature = "postgres")]
    pub db_pool: Option<sqlx::PgPool>,
}

impl AppParts {
    /// Local in-process backends for every subsystem.
    pub fn local(
        config: &GatewayConfig,
        providers: Vec<Arc<dyn Provider>>,
        tenants: Arc<dyn TenantStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let task_tracker = TaskTracker::new();

        let memory_cache = Arc::new(MemoryCache::new());
        memory_cache.spawn_janitor(&task_tracker);

        let breakers = providers
            .iter()
            .map(|p| {
                (
                    p.id().to_string(),
                    Arc::new(LocalBreaker::new(p.id(), config.circuit_breaker))
                        as Arc<dyn CircuitBreaker>,
                )
            })
            .collect();

        Self {
            http_client: config
                .http_client
                .build_client()
                .unwrap_or_else(|_| reqwest::Client::new()),
            providers,
            tenants,
            ledger,
            rate_limiter: Arc::new(LocalRateLimiter::new(config.rate_limit.window)),
            cache: memory_cache,
            dedup: Arc::new(LocalDeduper::new()),
            breakers,
            task_tracker,
            #[cfg(feature = "redis")]
            redis_cache: None,
            #[cfg(feature = "postgres")]
            db_pool: None,
        }
    }
}

impl AppState {
    /// Wire the gateway from configuration.
    ///
    /// Shared backends are chosen by the presence of their URLs; anything
    /// unset degrades to the local in-process equivalent.
    pub async fn new(config: GatewayConfig, metrics: Metrics) -> Result<Self, BoxError> {
        let http_client = config.http_client.build_client()?;
        let task_tracker = TaskTracker::new();

        // Shared coordination store.
        #[cfg(feature = "redis")]
        let redis_client = match &config.redis_url {
            Some(url) => Some(redis::Client::open(url.as_str())?),
            None => None,
        };

        #[cfg(feature = "redis")]
        let redis_cache = match &config.redis_url {
            Some(url) => Some(Arc::new(cache::RedisCache::connect(url)?)),
            None => None,
        };

        let cache: Arc<dyn Cache> = {
            #[cfg(feature = "redis")]
            {
                match &redis_cache {
                    Some(redis) => {
                        tracing::info!("using shared cache backend");
                        Arc::clone(redis) as Arc<dyn Cache>
                    }
                    None => local_memory_cache(&task_tracker),
                }
            }
            #[cfg(not(feature = "redis"))]
            {
                if config.redis_url.is_some() {
                    tracing::warn!(
                        "PALISADE_REDIS_URL is set but this build has no 'redis' feature; using local backends"
                    );
                }
                local_memory_cache(&task_tracker)
            }
        };

        let rate_limiter: Arc<dyn RateLimiter> = {
            #[cfg(feature = "redis")]
            {
                match &config.redis_url {
                    Some(url) => Arc::new(ratelimit::RedisRateLimiter::connect(
                        url,
                        config.rate_limit.window,
                    )?),
                    None => Arc::new(LocalRateLimiter::new(config.rate_limit.window)),
                }
            }
            #[cfg(not(feature = "redis"))]
            {
                Arc::new(LocalRateLimiter::new(config.rate_limit.window))
            }
        };

        let dedup: Arc<dyn AlertDeduper> = {
            #[cfg(feature = "redis")]
            {
                match &redis_cache {
                    Some(redis) => Arc::new(budget::MarkerDeduper::new(
                        Arc::clone(redis) as Arc<dyn Cache>,
                        config.budget.dedup_window,
                    )),
                    None => Arc::new(LocalDeduper::new()),
                }
            }
            #[cfg(not(feature = "redis"))]
            {
                Arc::new(LocalDeduper::new())
            }
        };

        // Durable stores.
        #[cfg(feature = "postgres")]
        let db_pool = match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(16)
                    .connect(url)
                    .await?;
                Some(pool)
            }
            None => None,
        };

        let (tenants, ledger): (Arc<dyn TenantStore>, Arc<dyn UsageLedger>) = {
            #[cfg(feature = "postgres")]
            {
                match &db_pool {
                    Some(pool) => {
                        let tenant_store = tenants::PostgresTenantStore::new(pool.clone());
                        tenant_store.ensure_schema().await?;
                        let ledger = usage::PostgresLedger::new(pool.clone());
                        ledger.ensure_schema().await?;
                        tracing::info!("using durable tenant directory and usage ledger");
                        (Arc::new(tenant_store), Arc::new(ledger))
                    }
                    None => (
                        Arc::new(MemoryTenantStore::new()) as Arc<dyn TenantStore>,
                        Arc::new(MemoryLedger::new()) as Arc<dyn UsageLedger>,
                    ),
                }
            }
            #[cfg(not(feature = "postgres"))]
            {
                if config.database_url.is_some() {
                    tracing::warn!(
                        "PALISADE_DATABASE_URL is set but this build has no 'postgres' feature; using in-memory stores"
                    );
                }
                (
                    Arc::new(MemoryTenantStore::new()) as Arc<dyn TenantStore>,
                    Arc::new(MemoryLedger::new()) as Arc<dyn UsageLedger>,
                )
            }
        };

        // Providers.
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        if let Some(endpoint) = &config.providers.openai {
            providers.push(Arc::new(OpenAiProvider::new(
                "openai",
                endpoint.base_url.clone(),
                endpoint.api_key.clone(),
            )));
        }
        if let Some(endpoint) = &config.providers.anthropic {
            providers.push(Arc::new(AnthropicProvider::new(
                "anthropic",
                endpoint.base_url.clone(),
                endpoint.api_key.clone().unwrap_or_default(),
            )));
        }
        if let Some(endpoint) = &config.providers.local {
            providers.push(Arc::new(OpenAiProvider::new(
                "local",
                endpoint.base_url.clone(),
                endpoint.api_key.clone(),
            )));
        }
        if config.providers.echo_enabled {
            providers.push(Arc::new(EchoProvider::new("echo")));
        }
        if providers.is_empty() {
            tracing::warn!("no providers configured; every chat request will fail with 502");
        }

        // Breakers, shared when asked for and a store is present.
        let breakers: Vec<(String, Arc<dyn CircuitBreaker>)> = providers
            .iter()
            .map(|p| {
                let id = p.id().to_string();
                #[cfg(feature = "redis")]
                if config.shared_breakers && let Some(client) = &redis_client {
                    return (
                        id.clone(),
                        Arc::new(breaker::RedisBreaker::new(
                            id,
                            client.clone(),
                            config.circuit_breaker,
                        )) as Arc<dyn CircuitBreaker>,
                    );
                }
                (
                    id.clone(),
                    Arc::new(LocalBreaker::new(id, config.circuit_breaker))
                        as Arc<dyn CircuitBreaker>,
                )
            })
            .collect();

        let parts = AppParts {
            http_client,
            providers,
            tenants,
            ledger,
            rate_limiter,
            cache,
            dedup,
            breakers,
            task_tracker,
            #[cfg(feature = "redis")]
            redis_cache,
            #[cfg(feature = "postgres")]
            db_pool,
        };

        Ok(Self::assemble(config, metrics, parts))
    }

    /// Assemble the state from already-chosen backends.
    pub fn assemble(config: GatewayConfig, metrics: Metrics, parts: AppParts) -> Self {
        let registry = ProviderRegistry::new(parts.providers);
        let breaker_registry = Arc::new(BreakerRegistry::new(parts.breakers));
        let router = Arc::new(ProviderRouter::new(
            registry,
            breaker_registry,
            config.providers.preferred.clone(),
            config.providers.fallback_order.clone(),
        ));

        let response_cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::new(Arc::clone(&parts.cache), config.cache.ttl)));

        let mut budget = BudgetMonitor::new(Arc::clone(&parts.ledger), parts.dedup, &config.budget);
        budget.register(Box::new(LogAlertHandler));

        Self {
            config: Arc::new(config),
            http_client: parts.http_client,
            tenants: parts.tenants,
            rate_limiter: parts.rate_limiter,
            router,
            response_cache,
            pricing: Arc::new(PricingTable::with_defaults()),
            ledger: parts.ledger,
            budget: Arc::new(budget),
            metrics,
            task_tracker: parts.task_tracker,
            shutdown: ShutdownFlag::new(),
            #[cfg(feature = "redis")]
            redis_cache: parts.redis_cache,
            #[cfg(feature = "postgres")]
            db_pool: parts.db_pool,
        }
    }
}

fn local_memory_cache(task_tracker: &TaskTracker) -> Arc<dyn Cache> {
    let memory_cache = Arc::new(MemoryCache::new());
    memory_cache.spawn_janitor(task_tracker);
    memory_cache
}

/// Build the HTTP router.
pub fn build_app(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(routes::health))
        .route("/health/live", get(routes::liveness))
        .route("/health/ready", get(routes::readiness))
        .route("/metrics", get(routes::metrics));

    let v1 = Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/usage", get(routes::usage_report))
        .route_layer(from_fn_with_state(
            Arc::clone(&state.tenants),
            auth_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(v1)
        .fallback(routes::not_found)
        // route_layer so the matched path template is available for
        // bounded-cardinality metric labels.
        .route_layer(from_fn_with_state(state.clone(), http_metrics_middleware))
        .layer(from_fn_with_state(
            state.shutdown.clone(),
            shutdown_gate_middleware,
        ))
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway until SIGINT/SIGTERM, then drain and stop.
///
/// Shutdown sequence: flip the shutdown flag (new requests get 503 with
/// `Connection: close`), stop accepting, let in-flight requests finish up
/// to the shutdown timeout, then drain background tasks up to the drain
/// timeout.
pub async fn serve(config: GatewayConfig) -> Result<(), BoxError> {
    let metrics = match Metrics::install() {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder install failed; metrics disabled");
            Metrics::disabled()
        }
    };

    let listen_addr = config.server.listen_addr;
    let drain_timeout = config.server.drain_timeout;
    let shutdown_timeout = config.server.shutdown_timeout;

    let state = AppState::new(config, metrics).await?;
    let shutdown_flag = state.shutdown.clone();
    let task_tracker = state.task_tracker.clone();
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "gateway listening");

    let shutdown_started = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            shutdown_flag,
            Arc::clone(&shutdown_started),
        ))
        .into_future();

    let hard_stop = async {
        shutdown_started.notified().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = hard_stop => {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "shutdown timeout elapsed with requests still in flight, aborting"
            );
        }
    }

    // Background tasks (cache janitor, stream forwarders, accounting).
    task_tracker.close();
    if tokio::time::timeout(drain_timeout, task_tracker.wait()).await.is_err() {
        tracing::warn!(
            timeout_secs = drain_timeout.as_secs(),
            "background tasks did not drain in time"
        );
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(flag: ShutdownFlag, started: Arc<Notify>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, refusing new requests and draining");
    flag.begin_shutdown();
    started.notify_waiters();
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request as HttpRequest, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;
    use crate::providers::EchoProvider;

    fn test_state() -> AppState {
        let config = GatewayConfig::default();
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(EchoProvider::new("echo"))];
        let parts = AppParts::local(
            &config,
            providers,
            Arc::new(MemoryTenantStore::new()),
            Arc::new(MemoryLedger::new()),
        );
        AppState::assemble(config, Metrics::disabled(), parts)
    }

    #[tokio::test]
    async fn liveness_is_public() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_providers_and_breakers() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["providers"]["echo"], "ok");
        assert_eq!(json["circuit_breakers"]["echo"], "closed");
    }

    #[tokio::test]
    async fn v1_routes_require_auth() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_path_is_enveloped_404() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "error");
        assert_eq!(json["error"]["code"], 404);
    }

    #[tokio::test]
    async fn shutdown_gate_turns_requests_away() {
        let state = test_state();
        let app = build_app(state.clone());
        state.shutdown.begin_shutdown();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("connection").unwrap(), "close");
    }
}
