//! `POST /v1/chat/completions` — the request pipeline.
//!
//! Order of operations: budget guard, rate-limit admission (headers are
//! written whatever the outcome), body decode, model allow-list, then the
//! unary or streaming branch. Write-side failures after a successful
//! backend call (cache store, ledger append, budget check) are logged and
//! swallowed; they never turn a success into a failure.

use std::time::Instant;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use validator::Validate;

use crate::{
    AppState,
    api_types::{ChatRequest, ChatResponse, GatewayAnnotation, TokenUsage},
    cache::CacheLookup,
    error::GatewayError,
    middleware::{AuthedTenant, RequestId},
    pricing::microcents_to_usd,
    ratelimit::RateLimitDecision,
    routing::RoutePrefs,
    streaming::{data_frame, done_frame},
    tenants::Tenant,
    usage::UsageRecord,
};

/// Routing hint: pin the request to one provider.
const PROVIDER_HEADER: &str = "X-Provider";
/// Bypass the cache lookup for this request.
const SKIP_CACHE_HEADER: &str = "X-Skip-Cache";
const CACHE_HEADER: &str = "X-Cache";

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Extension(AuthedTenant(tenant)): Extension<AuthedTenant>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    // Budget guard. Aggregate errors are logged, never propagated: a
    // broken ledger must not take down serving.
    match state.budget.is_exceeded(&tenant).await {
        Ok(true) => return GatewayError::BudgetExceeded.into_response(),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(tenant_id = %tenant.id, error = %e, "budget guard aggregate failed, admitting");
        }
    }

    // Rate-limit admission. The three headers go on every response from
    // here on, denied or served.
    let decision = match state.rate_limiter.admit(tenant.id, tenant.rate_limit).await {
        Ok(decision) => decision,
        Err(e) => return GatewayError::internal(e).into_response(),
    };

    if !decision.allowed {
        state.metrics.record_rate_limit("limited");
        let response = GatewayError::RateLimited {
            limit: decision.limit,
        }
        .into_response();
        return with_rate_limit_headers(response, &decision);
    }
    state.metrics.record_rate_limit("allowed");

    let response = match serve(&state, &tenant, &request_id, &headers, body, started).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    with_rate_limit_headers(response, &decision)
}

async fn serve(
    state: &AppState,
    tenant: &Tenant,
    request_id: &str,
    headers: &HeaderMap,
    body: Bytes,
    started: Instant,
) -> Result<Response, GatewayError> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;
    request
        .validate()
        .map_err(|e| GatewayError::BadRequest(format!("invalid request: {e}")))?;

    if !tenant.allows_model(&request.model) {
        return Err(GatewayError::Forbidden(format!(
            "model '{}' is not allowed for this tenant",
            request.model
        )));
    }

    let hint = headers
        .get(PROVIDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let trace_id = trace_id_from(headers, request_id);
    let prefs = RoutePrefs {
        preferred: tenant.preferred_provider.as_deref(),
        fallback: (!tenant.fallback_providers.is_empty()).then_some(&tenant.fallback_providers[..]),
    };

    if request.stream {
        serve_streaming(state, tenant, request_id, &trace_id, hint, prefs, request, started).await
    } else {
        serve_unary(state, tenant, request_id, &trace_id, hint, prefs, headers, request, started)
            .await
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_unary(
    state: &AppState,
    tenant: &Tenant,
    request_id: &str,
    trace_id: &str,
    hint: Option<&str>,
    prefs: RoutePrefs<'_>,
    headers: &HeaderMap,
    request: ChatRequest,
    started: Instant,
) -> Result<Response, GatewayError> {
    let skip_cache = headers.contains_key(SKIP_CACHE_HEADER);

    if let Some(cache) = &state.response_cache
        && !skip_cache
        && let CacheLookup::Hit(mut cached) = cache.lookup(&request).await
    {
        state.metrics.record_cache_lookup("hit");
        cached.x_gateway = Some(GatewayAnnotation {
            provider: "cache".to_string(),
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd: 0.0,
            cache_hit: true,
            request_id: request_id.to_string(),
            trace_id: trace_id.to_string(),
        });
        return Ok(respond_json(cached, "HIT"));
    }
    if state.response_cache.is_some() && !skip_cache {
        state.metrics.record_cache_lookup("miss");
    }

    let candidates = state
        .router
        .select_with_fallback(hint, &request.model, prefs)
        .await
        .map_err(|e| {
            tracing::warn!(tenant_id = %tenant.id, model = %request.model, error = %e, "provider selection failed");
            GatewayError::NoProvider
        })?;

    let mut last_error: Option<String> = None;
    let mut outcome: Option<(String, ChatResponse)> = None;

    for provider in candidates {
        let provider_id = provider.id().to_string();
        let call_started = Instant::now();
        match provider.chat(&state.http_client, &request).await {
            Ok(response) => {
                state.router.record_success(&provider_id).await;
                state.metrics.record_llm_request(
                    &provider_id,
                    &request.model,
                    "success",
                    call_started.elapsed().as_secs_f64(),
                    response.usage.prompt_tokens,
                    response.usage.completion_tokens,
                );
                outcome = Some((provider_id, response));
                break;
            }
            Err(e) => {
                tracing::warn!(
                    provider = %provider_id,
                    model = %request.model,
                    error = %e,
                    "provider call failed, trying next candidate"
                );
                state.router.record_failure(&provider_id).await;
                state.metrics.record_llm_request(
                    &provider_id,
                    &request.model,
                    "error",
                    call_started.elapsed().as_secs_f64(),
                    0,
                    0,
                );
                last_error = Some(e.to_string());
            }
        }
    }

    let Some((provider_id, mut response)) = outcome else {
        return Err(GatewayError::UpstreamFailed(
            last_error.unwrap_or_else(|| "no candidate providers".to_string()),
        ));
    };

    // Only deterministic requests are cached; the pipeline owns that
    // decision, not the cache.
    if let Some(cache) = &state.response_cache
        && request.is_deterministic()
    {
        cache.store(&request, &response).await;
    }

    let cost_microcents =
        account_usage(state, tenant, request_id, &request.model, &provider_id, response.usage)
            .await;

    response.x_gateway = Some(GatewayAnnotation {
        provider: provider_id,
        latency_ms: started.elapsed().as_millis() as u64,
        cost_usd: microcents_to_usd(cost_microcents),
        cache_hit: false,
        request_id: request_id.to_string(),
        trace_id: trace_id.to_string(),
    });

    Ok(respond_json(response, "MISS"))
}

#[allow(clippy::too_many_arguments)]
async fn serve_streaming(
    state: &AppState,
    tenant: &Tenant,
    request_id: &str,
    trace_id: &str,
    hint: Option<&str>,
    prefs: RoutePrefs<'_>,
    request: ChatRequest,
    started: Instant,
) -> Result<Response, GatewayError> {
    // One provider for the whole stream; there is no mid-stream fallback.
    let provider = state
        .router
        .select(hint, &request.model, prefs)
        .await
        .map_err(|e| {
            tracing::warn!(tenant_id = %tenant.id, model = %request.model, error = %e, "provider selection failed");
            GatewayError::NoProvider
        })?;

    let provider_id = provider.id().to_string();
    let mut upstream = match provider.chat_stream(&state.http_client, &request).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(provider = %provider_id, error = %e, "streaming call failed to start");
            state.router.record_failure(&provider_id).await;
            return Err(GatewayError::UpstreamFailed(e.to_string()));
        }
    };

    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    let tracker = state.task_tracker.clone();
    let state = state.clone();
    let tenant = tenant.clone();
    let request_id = request_id.to_string();
    let trace_id = trace_id.to_string();
    let model = request.model.clone();
    let forward_provider_id = provider_id.clone();

    // The forwarder owns the upstream stream. Client disconnection drops
    // the receiver; the next send fails and the task exits, which drops
    // the upstream call and closes its socket.
    tracker.spawn(async move {
        let mut usage: Option<TokenUsage> = None;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(chunk_usage) = chunk.usage {
                        usage = Some(chunk_usage);
                    }
                    let json = match serde_json::to_string(&chunk) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize stream chunk, skipping");
                            continue;
                        }
                    };
                    if tx.send(Ok(data_frame(&json))).await.is_err() {
                        tracing::debug!(provider = %forward_provider_id, "client disconnected mid-stream");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %forward_provider_id, error = %e, "stream failed");
                    state.router.record_failure(&forward_provider_id).await;
                    state.metrics.record_llm_request(
                        &forward_provider_id,
                        &model,
                        "error",
                        started.elapsed().as_secs_f64(),
                        0,
                        0,
                    );
                    return;
                }
            }
        }

        // Clean end of stream: annotation frame, then the terminator.
        state.router.record_success(&forward_provider_id).await;

        let usage = usage.unwrap_or_default();
        let cost_microcents =
            account_usage(&state, &tenant, &request_id, &model, &forward_provider_id, usage).await;
        state.metrics.record_llm_request(
            &forward_provider_id,
            &model,
            "success",
            started.elapsed().as_secs_f64(),
            usage.prompt_tokens,
            usage.completion_tokens,
        );

        let annotation = GatewayAnnotation {
            provider: forward_provider_id,
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd: microcents_to_usd(cost_microcents),
            cache_hit: false,
            request_id,
            trace_id,
        };
        let frame = serde_json::json!({ "x_gateway": annotation });
        if tx.send(Ok(data_frame(&frame.to_string()))).await.is_ok() {
            let _ = tx.send(Ok(done_frame())).await;
        }
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(rx))
        .map_err(GatewayError::internal)?;
    Ok(response)
}

/// Compute cost, append the usage record, and run the post-success budget
/// check. Every failure in here is deliberately non-fatal.
async fn account_usage(
    state: &AppState,
    tenant: &Tenant,
    request_id: &str,
    model: &str,
    provider_id: &str,
    usage: TokenUsage,
) -> i64 {
    let cost_microcents = match state.pricing.cost_microcents(
        model,
        usage.prompt_tokens,
        usage.completion_tokens,
    ) {
        Some(cost) => cost,
        None => {
            tracing::warn!(model, "no pricing configured for model, recording zero cost");
            0
        }
    };

    let record = UsageRecord {
        tenant_id: tenant.id,
        request_id: request_id.to_string(),
        model: model.to_string(),
        provider: provider_id.to_string(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cost_microcents,
        created_at: Utc::now(),
    };
    if let Err(e) = state.ledger.record(record).await {
        tracing::warn!(tenant_id = %tenant.id, error = %e, "usage record append failed");
    }

    // Handlers run inside check; the alert value itself is not needed
    // here.
    if let Some(alert) = state.budget.check(tenant).await {
        state.metrics.record_budget_alert(alert.level.as_str());
    }

    cost_microcents
}

fn respond_json(response: ChatResponse, cache_status: &'static str) -> Response {
    (
        StatusCode::OK,
        [(CACHE_HEADER, cache_status)],
        Json(response),
    )
        .into_response()
}

fn with_rate_limit_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::try_from(decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::try_from(decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::try_from(decision.reset_at.to_rfc3339()) {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

/// Take the trace id from a W3C `traceparent` header when one is present,
/// otherwise fall back to the request id so the annotation always
/// correlates to something.
fn trace_id_from(headers: &HeaderMap, request_id: &str) -> String {
    headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .and_then(|tp| tp.split('-').nth(1))
        .filter(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
        .unwrap_or_else(|| request_id.to_string())
}
