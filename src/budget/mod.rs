//! Monthly budget monitoring and alerting.
//!
//! `is_exceeded` is the cheap guard called at request entry; `check` runs
//! after a successful response, maps the month-to-date spend ratio to an
//! alert level, and emits at most one alert per (tenant, level) per
//! deduplication window. A budget of zero disables both.

mod dedup;

pub use dedup::{AlertDeduper, LocalDeduper, MarkerDeduper};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::BudgetConfig,
    tenants::Tenant,
    usage::{LedgerError, UsageLedger, start_of_month},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
    Exceeded,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exceeded => "exceeded",
        }
    }

    /// Every level, used to clear a tenant's markers without scanning.
    pub const ALL: [AlertLevel; 3] = [Self::Warning, Self::Critical, Self::Exceeded];
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub level: AlertLevel,
    pub spend_microcents: i64,
    pub budget_microcents: i64,
    pub ratio: f64,
}

/// Alert sink. Handlers run synchronously in registration order; a
/// handler that panics is isolated and later handlers still run.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, alert: &BudgetAlert);
}

/// Default handler: structured log lines, severity by level.
pub struct LogAlertHandler;

impl AlertHandler for LogAlertHandler {
    fn handle(&self, alert: &BudgetAlert) {
        match alert.level {
            AlertLevel::Warning => tracing::warn!(
                tenant_id = %alert.tenant_id,
                tenant = %alert.tenant_name,
                ratio = alert.ratio,
                "tenant approaching monthly budget"
            ),
            AlertLevel::Critical | AlertLevel::Exceeded => tracing::error!(
                tenant_id = %alert.tenant_id,
                tenant = %alert.tenant_name,
                level = alert.level.as_str(),
                ratio = alert.ratio,
                "tenant budget alert"
            ),
        }
    }
}

pub struct BudgetMonitor {
    ledger: Arc<dyn UsageLedger>,
    dedup: Arc<dyn AlertDeduper>,
    handlers: Vec<Box<dyn AlertHandler>>,
    warning_threshold: f64,
    critical_threshold: f64,
}

impl BudgetMonitor {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        dedup: Arc<dyn AlertDeduper>,
        config: &BudgetConfig,
    ) -> Self {
        Self {
            ledger,
            dedup,
            handlers: Vec::new(),
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
        }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn register(&mut self, handler: Box<dyn AlertHandler>) {
        self.handlers.push(handler);
    }

    /// Whether the tenant's month-to-date spend has reached its budget.
    pub async fn is_exceeded(&self, tenant: &Tenant) -> Result<bool, LedgerError> {
        if tenant.monthly_budget_microcents <= 0 {
            return Ok(false);
        }
        let spend = self
            .ledger
            .aggregate(tenant.id, start_of_month(chrono::Utc::now()))
            .await?;
        Ok(spend >= tenant.monthly_budget_microcents)
    }

    /// Evaluate thresholds and emit a deduplicated alert when one is due.
    ///
    /// Returns the alert only when it was actually emitted this call.
    /// Ledger errors are logged and swallowed: a broken ledger must not
    /// fail the request that triggered the check.
    pub async fn check(&self, tenant: &Tenant) -> Option<BudgetAlert> {
        if tenant.monthly_budget_microcents <= 0 {
            return None;
        }

        let spend = match self
            .ledger
            .aggregate(tenant.id, start_of_month(chrono::Utc::now()))
            .await
        {
            Ok(spend) => spend,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant.id, error = %e, "budget check aggregate failed");
                return None;
            }
        };

        let ratio = spend as f64 / tenant.monthly_budget_microcents as f64;
        let level = if ratio >= 1.0 {
            AlertLevel::Exceeded
        } else if ratio >= self.critical_threshold {
            AlertLevel::Critical
        } else if ratio >= self.warning_threshold {
            AlertLevel::Warning
        } else {
            // Back under the warning line: clear markers so the next
            // crossing re-emits.
            self.dedup.clear(tenant.id).await;
            return None;
        };

        if !self.dedup.should_alert(tenant.id, level).await {
            return None;
        }

        let alert = BudgetAlert {
            tenant_id: tenant.id,
            tenant_name: tenant.name.clone(),
            level,
            spend_microcents: spend,
            budget_microcents: tenant.monthly_budget_microcents,
            ratio,
        };

        for handler in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.handle(&alert))).is_err() {
                tracing::error!(
                    tenant_id = %tenant.id,
                    level = level.as_str(),
                    "budget alert handler panicked"
                );
            }
        }

        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::{
        config::BudgetConfig,
        usage::{MemoryLedger, UsageRecord},
    };

    fn tenant_with_budget(budget_microcents: i64) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: "acme".into(),
            key_hash: String::new(),
            rate_limit: 100,
            monthly_budget_microcents: budget_microcents,
            allowed_models: None,
            preferred_provider: None,
            fallback_providers: vec![],
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn seed(ledger: &MemoryLedger, tenant: &Tenant, cost: i64) {
        ledger
            .record(UsageRecord {
                tenant_id: tenant.id,
                request_id: Uuid::new_v4().to_string(),
                model: "gpt-4".into(),
                provider: "openai".into(),
                input_tokens: 0,
                output_tokens: 0,
                cost_microcents: cost,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn monitor(ledger: Arc<MemoryLedger>) -> BudgetMonitor {
        BudgetMonitor::new(
            ledger,
            Arc::new(LocalDeduper::new()),
            &BudgetConfig::default(),
        )
    }

    struct CountingHandler(Arc<AtomicUsize>);
    impl AlertHandler for CountingHandler {
        fn handle(&self, _alert: &BudgetAlert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingHandler;
    impl AlertHandler for PanickingHandler {
        fn handle(&self, _alert: &BudgetAlert) {
            panic!("handler blew up");
        }
    }

    #[tokio::test]
    async fn zero_budget_disables_everything() {
        let ledger = Arc::new(MemoryLedger::new());
        let tenant = tenant_with_budget(0);
        seed(&ledger, &tenant, 1_000_000).await;

        let monitor = monitor(Arc::clone(&ledger));
        assert!(!monitor.is_exceeded(&tenant).await.unwrap());
        assert!(monitor.check(&tenant).await.is_none());
    }

    #[tokio::test]
    async fn exceeded_guard_trips_at_budget() {
        let ledger = Arc::new(MemoryLedger::new());
        let tenant = tenant_with_budget(1_000);
        seed(&ledger, &tenant, 999).await;

        let monitor = monitor(Arc::clone(&ledger));
        assert!(!monitor.is_exceeded(&tenant).await.unwrap());

        seed(&ledger, &tenant, 1).await;
        assert!(monitor.is_exceeded(&tenant).await.unwrap());
    }

    #[tokio::test]
    async fn level_is_the_strictest_crossed_threshold() {
        let ledger = Arc::new(MemoryLedger::new());
        let monitor = monitor(Arc::clone(&ledger));

        let tenant = tenant_with_budget(1_000);
        seed(&ledger, &tenant, 800).await;
        assert_eq!(
            monitor.check(&tenant).await.unwrap().level,
            AlertLevel::Warning
        );

        seed(&ledger, &tenant, 150).await;
        assert_eq!(
            monitor.check(&tenant).await.unwrap().level,
            AlertLevel::Critical
        );

        seed(&ledger, &tenant, 50).await;
        assert_eq!(
            monitor.check(&tenant).await.unwrap().level,
            AlertLevel::Exceeded
        );
    }

    #[tokio::test]
    async fn repeated_checks_emit_once_per_level() {
        let ledger = Arc::new(MemoryLedger::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut monitor = monitor(Arc::clone(&ledger));
        monitor.register(Box::new(CountingHandler(Arc::clone(&counter))));

        let tenant = tenant_with_budget(1_000);
        seed(&ledger, &tenant, 850).await;

        assert!(monitor.check(&tenant).await.is_some());
        assert!(monitor.check(&tenant).await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_later_handlers() {
        let ledger = Arc::new(MemoryLedger::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut monitor = monitor(Arc::clone(&ledger));
        monitor.register(Box::new(PanickingHandler));
        monitor.register(Box::new(CountingHandler(Arc::clone(&counter))));

        let tenant = tenant_with_budget(1_000);
        seed(&ledger, &tenant, 990).await;

        assert!(monitor.check(&tenant).await.is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn below_warning_emits_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        let monitor = monitor(Arc::clone(&ledger));

        let tenant = tenant_with_budget(1_000);
        seed(&ledger, &tenant, 500).await;
        assert!(monitor.check(&tenant).await.is_none());
    }
}
