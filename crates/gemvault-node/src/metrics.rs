//! Prometheus metrics

use gemvault_core::{LedgerEntry, PostingObserver};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Service metrics
pub struct VaultMetrics {
    /// Prometheus registry
    registry: Registry,
    operations: IntCounterVec,
    postings: IntCounterVec,
    shield_pool_depleted: IntCounter,
    shield_paid_gems: IntCounter,
    accounts: IntGauge,
}

impl VaultMetrics {
    /// Create and register all collectors
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("gemvault_operations_total", "Operations handled by outcome"),
            &["op", "outcome"],
        )?;
        let postings = IntCounterVec::new(
            Opts::new("gemvault_ledger_postings_total", "Committed ledger postings"),
            &["currency", "direction"],
        )?;
        let shield_pool_depleted = IntCounter::new(
            "gemvault_shield_pool_depleted_total",
            "Shield evaluations the pool could not fully cover",
        )?;
        let shield_paid_gems = IntCounter::new(
            "gemvault_shield_paid_gems_total",
            "Gems paid out as shortfall top-ups",
        )?;
        let accounts = IntGauge::new("gemvault_accounts", "Open ledger accounts")?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(postings.clone()))?;
        registry.register(Box::new(shield_pool_depleted.clone()))?;
        registry.register(Box::new(shield_paid_gems.clone()))?;
        registry.register(Box::new(accounts.clone()))?;

        Ok(Self {
            registry,
            operations,
            postings,
            shield_pool_depleted,
            shield_paid_gems,
            accounts,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_operation(&self, op: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.operations.with_label_values(&[op, outcome]).inc();
    }

    pub fn record_shield_payout(&self, covered: u64, pool_exhausted: bool) {
        self.shield_paid_gems.inc_by(covered);
        if pool_exhausted {
            self.shield_pool_depleted.inc();
        }
    }

    pub fn set_accounts(&self, count: usize) {
        self.accounts.set(count as i64);
    }

    pub fn operation_count(&self, op: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[op, outcome]).get()
    }

    pub fn posting_count(&self, currency: &str, direction: &str) -> u64 {
        self.postings.with_label_values(&[currency, direction]).get()
    }

    pub fn shield_pool_depleted_count(&self) -> u64 {
        self.shield_pool_depleted.get()
    }

    /// Encode every metric family in the text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Metrics encoding failed: {}", err);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl PostingObserver for VaultMetrics {
    fn on_posting(&self, entry: &LedgerEntry) {
        let direction = if entry.delta >= 0 { "credit" } else { "debit" };
        self.postings
            .with_label_values(&[entry.currency.name(), direction])
            .inc();
    }
}
