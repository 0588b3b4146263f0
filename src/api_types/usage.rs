//! Tenant-facing usage report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Month-to-date usage summary for `GET /v1/usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub tenant_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_cost_usd: f64,
    pub budget_usd: f64,
    /// Percentage of the monthly budget consumed; 0 when the budget is
    /// unlimited.
    pub budget_used_pct: f64,
    pub request_count: i64,
}
