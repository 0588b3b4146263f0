//! In-memory usage ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{LedgerResult, UsageLedger, UsageRecord};

#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn record(&self, record: UsageRecord) -> LedgerResult<()> {
        let mut records = self.records.lock();
        // Appends are idempotent on request id, matching the durable
        // backend's conflict handling.
        if records.iter().any(|r| r.request_id == record.request_id) {
            return Ok(());
        }
        records.push(record);
        Ok(())
    }

    async fn aggregate(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64> {
        let records = self.records.lock();
        Ok(records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= since)
            .map(|r| r.cost_microcents)
            .sum())
    }

    async fn list(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<Vec<UsageRecord>> {
        let records = self.records.lock();
        let mut matching: Vec<UsageRecord> = records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn count(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64> {
        let records = self.records.lock();
        Ok(records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= since)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(tenant: Uuid, request_id: &str, cost: i64, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            tenant_id: tenant,
            request_id: request_id.to_string(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            input_tokens: 10,
            output_tokens: 20,
            cost_microcents: cost,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn aggregate_sums_only_matching_records() {
        let ledger = MemoryLedger::new();
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();

        ledger.record(record(tenant, "r1", 100, now)).await.unwrap();
        ledger.record(record(tenant, "r2", 250, now)).await.unwrap();
        ledger.record(record(other, "r3", 999, now)).await.unwrap();
        ledger
            .record(record(tenant, "r4", 500, now - Duration::days(60)))
            .await
            .unwrap();

        let sum = ledger.aggregate(tenant, now - Duration::days(30)).await.unwrap();
        assert_eq!(sum, 350);
        assert_eq!(ledger.count(tenant, now - Duration::days(30)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_request_id_is_ignored() {
        let ledger = MemoryLedger::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        ledger.record(record(tenant, "r1", 100, now)).await.unwrap();
        ledger.record(record(tenant, "r1", 100, now)).await.unwrap();

        assert_eq!(ledger.aggregate(tenant, now - Duration::hours(1)).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn list_is_ordered_by_time() {
        let ledger = MemoryLedger::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        ledger
            .record(record(tenant, "newer", 1, now))
            .await
            .unwrap();
        ledger
            .record(record(tenant, "older", 1, now - Duration::minutes(5)))
            .await
            .unwrap();

        let records = ledger.list(tenant, now - Duration::hours(1)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, "older");
        assert_eq!(records[1].request_id, "newer");
    }
}
