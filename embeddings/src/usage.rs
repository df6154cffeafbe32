use crate::error::EmbeddingError;
use crate::error::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Tokens consumed by one successful provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, input_tokens: u64) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for usage accounting.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: UsageRecord) -> Result<()>;
}

/// Running totals for one provider/model pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
}

/// In-memory sink keyed by `"{provider}/{model}"`.
#[derive(Debug, Default)]
pub struct UsageLedger {
    totals: Mutex<BTreeMap<String, UsageTotals>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> BTreeMap<String, UsageTotals> {
        match self.totals.lock() {
            Ok(totals) => totals.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.totals().values().map(|t| t.input_tokens).sum()
    }
}

#[async_trait]
impl UsageSink for UsageLedger {
    async fn record(&self, usage: UsageRecord) -> Result<()> {
        let mut totals = self
            .totals
            .lock()
            .map_err(|err| EmbeddingError::Usage(err.to_string()))?;
        let entry = totals
            .entry(format!("{}/{}", usage.provider, usage.model))
            .or_default();
        entry.calls += 1;
        entry.input_tokens += usage.input_tokens;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_ledger_accumulates_per_model() {
        let ledger = UsageLedger::new();
        ledger.record(UsageRecord::new("vertex", "m1", 10)).await.unwrap();
        ledger.record(UsageRecord::new("vertex", "m1", 5)).await.unwrap();
        ledger.record(UsageRecord::new("vertex", "m2", 1)).await.unwrap();

        let totals = ledger.totals();
        assert_eq!(
            totals.get("vertex/m1"),
            Some(&UsageTotals {
                calls: 2,
                input_tokens: 15
            })
        );
        assert_eq!(ledger.total_tokens(), 16);
    }
}
