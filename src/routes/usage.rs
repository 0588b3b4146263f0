//! `GET /v1/usage` — month-to-date spend for the calling tenant.

use axum::{Extension, Json, extract::State};
use chrono::Utc;

use crate::{
    AppState,
    api_types::UsageReport,
    error::GatewayError,
    middleware::AuthedTenant,
    pricing::microcents_to_usd,
    usage::start_of_month,
};

pub async fn usage_report(
    State(state): State<AppState>,
    Extension(AuthedTenant(tenant)): Extension<AuthedTenant>,
) -> Result<Json<UsageReport>, GatewayError> {
    let now = Utc::now();
    let period_start = start_of_month(now);

    let total_microcents = state
        .ledger
        .aggregate(tenant.id, period_start)
        .await
        .map_err(GatewayError::internal)?;
    let request_count = state
        .ledger
        .count(tenant.id, period_start)
        .await
        .map_err(GatewayError::internal)?;

    let budget_microcents = tenant.monthly_budget_microcents;
    let budget_used_pct = if budget_microcents > 0 {
        (total_microcents as f64 / budget_microcents as f64) * 100.0
    } else {
        0.0
    };

    Ok(Json(UsageReport {
        tenant_id: tenant.id,
        period_start,
        period_end: now,
        total_cost_usd: microcents_to_usd(total_microcents),
        budget_usd: microcents_to_usd(budget_microcents),
        budget_used_pct,
        request_count,
    }))
}
