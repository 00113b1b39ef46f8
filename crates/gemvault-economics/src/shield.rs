//! # Social Shield
//!
//! Tops up a user's realized payout when it falls short of the promised
//! amount, paid out of a per-account shield pool.
//!
//! ```text
//! shortfall = max(0, expected - actual_verified)
//! covered   = min(shortfall, floor(shortfall x coverage / 100), pool)
//! ```
//!
//! The engine only ever credits. A pool that cannot cover the shortfall pays
//! what it holds and reports `pool_exhausted`; the base payout was already
//! delivered, so this is a funding signal for operators rather than an error.

use crate::constants::MAX_COVERAGE_PERCENT;
use crate::staking::LockPeriod;
use dashmap::DashMap;
use gemvault_core::{AccountId, Currency, Ledger, ReasonCode, Result, Tier, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shield policy for one account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldPolicy {
    pub account_id: AccountId,
    /// Share of a shortfall the shield pays, in (0, 100]
    pub coverage_percent: u8,
    /// Gems available for top-ups
    pub pool_balance_gems: u64,
    /// Lifetime top-ups paid
    pub total_paid_gems: u64,
}

/// Result of a shield evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldOutcome {
    pub account_id: AccountId,
    pub correlation_id: String,
    pub expected: u64,
    pub actual_verified: u64,
    pub shortfall: u64,
    pub coverage_percent: u8,
    /// Gems credited to the account
    pub covered: u64,
    pub pool_remaining: u64,
    /// The pool could not pay the full covered share
    pub pool_exhausted: bool,
    /// Answered from an earlier evaluation with the same correlation id
    pub replayed: bool,
}

/// Coverage by tier plus a bonus per open stake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageTable {
    by_tier: BTreeMap<Tier, u8>,
    stake_bonus: BTreeMap<LockPeriod, u8>,
}

impl Default for CoverageTable {
    fn default() -> Self {
        Self {
            by_tier: BTreeMap::from([(Tier::Free, 50), (Tier::Premium, 75), (Tier::Super, 100)]),
            stake_bonus: BTreeMap::from([
                (LockPeriod::Days30, 5),
                (LockPeriod::Days60, 10),
                (LockPeriod::Days90, 15),
            ]),
        }
    }
}

impl CoverageTable {
    /// Build a table, rejecting tier coverage outside (0, 100]
    pub fn new(
        by_tier: impl IntoIterator<Item = (Tier, u8)>,
        stake_bonus: impl IntoIterator<Item = (LockPeriod, u8)>,
    ) -> Result<Self> {
        let by_tier: BTreeMap<_, _> = by_tier.into_iter().collect();
        for percent in by_tier.values() {
            validate_coverage(*percent)?;
        }
        Ok(Self {
            by_tier,
            stake_bonus: stake_bonus.into_iter().collect(),
        })
    }

    pub fn base(&self, tier: Tier) -> Result<u8> {
        self.by_tier
            .get(&tier)
            .copied()
            .ok_or_else(|| VaultError::UnknownTier(tier.name().to_string()))
    }

    /// Coverage for a tier with the given open stakes, capped at 100
    pub fn coverage_for(&self, tier: Tier, open_locks: &[LockPeriod]) -> Result<u8> {
        let bonus: u32 = open_locks
            .iter()
            .map(|lock| self.stake_bonus.get(lock).copied().unwrap_or(0) as u32)
            .sum();
        let total = (self.base(tier)? as u32 + bonus).min(MAX_COVERAGE_PERCENT as u32);
        Ok(total as u8)
    }

    pub fn tiers(&self) -> impl Iterator<Item = (Tier, u8)> + '_ {
        self.by_tier.iter().map(|(t, p)| (*t, *p))
    }

    pub fn bonuses(&self) -> impl Iterator<Item = (LockPeriod, u8)> + '_ {
        self.stake_bonus.iter().map(|(l, p)| (*l, *p))
    }
}

fn validate_coverage(percent: u8) -> Result<()> {
    if percent == 0 || percent > MAX_COVERAGE_PERCENT {
        return Err(VaultError::InvalidCoverage(percent));
    }
    Ok(())
}

/// Shield engine
pub struct ShieldEngine {
    ledger: Arc<Ledger>,
    coverage: CoverageTable,
    policies: DashMap<AccountId, ShieldPolicy>,
    outcomes: DashMap<(AccountId, String), ShieldOutcome>,
    fundings: DashMap<(AccountId, String), u64>,
}

impl ShieldEngine {
    pub fn new(ledger: Arc<Ledger>, coverage: CoverageTable) -> Self {
        Self {
            ledger,
            coverage,
            policies: DashMap::new(),
            outcomes: DashMap::new(),
            fundings: DashMap::new(),
        }
    }

    pub fn coverage_table(&self) -> &CoverageTable {
        &self.coverage
    }

    /// Create the account's policy at its tier coverage with an empty pool
    pub fn enroll(&self, account_id: &AccountId) -> Result<ShieldPolicy> {
        self.ledger.transact(account_id, |book| {
            if let Some(policy) = self.policies.get(account_id) {
                return Ok(policy.clone());
            }
            let policy = ShieldPolicy {
                account_id: account_id.clone(),
                coverage_percent: self.coverage.base(book.tier())?,
                pool_balance_gems: 0,
                total_paid_gems: 0,
            };
            self.policies.insert(account_id.clone(), policy.clone());
            tracing::debug!(account = %account_id, coverage = policy.coverage_percent, "Shield enrolled");
            Ok(policy)
        })
    }

    pub fn policy(&self, account_id: &AccountId) -> Result<ShieldPolicy> {
        self.policies
            .get(account_id)
            .map(|p| p.clone())
            .ok_or_else(|| VaultError::AccountNotFound(account_id.clone()))
    }

    /// Raise coverage; a lower value leaves the policy unchanged
    pub fn raise_coverage(&self, account_id: &AccountId, percent: u8) -> Result<ShieldPolicy> {
        validate_coverage(percent)?;
        self.ledger.transact(account_id, |_book| {
            let mut policy = self
                .policies
                .get_mut(account_id)
                .ok_or_else(|| VaultError::AccountNotFound(account_id.clone()))?;
            if percent > policy.coverage_percent {
                tracing::info!(
                    account = %account_id,
                    from = policy.coverage_percent,
                    to = percent,
                    "Shield coverage raised"
                );
                policy.coverage_percent = percent;
            }
            Ok(policy.clone())
        })
    }

    /// Recompute coverage from tier and open stakes, never lowering it
    pub fn refresh_coverage(
        &self,
        account_id: &AccountId,
        tier: Tier,
        open_locks: &[LockPeriod],
    ) -> Result<ShieldPolicy> {
        let percent = self.coverage.coverage_for(tier, open_locks)?;
        self.raise_coverage(account_id, percent)
    }

    /// Credit the shield pool (contribution instruction)
    pub fn fund(&self, account_id: &AccountId, gems: u64, correlation_id: &str) -> Result<ShieldPolicy> {
        if gems == 0 {
            return Err(VaultError::InvalidAmount(0));
        }
        let key = (account_id.clone(), correlation_id.to_string());

        self.ledger.transact(account_id, |_book| {
            let previous = self.fundings.get(&key).map(|g| *g.value());
            match previous {
                Some(amount) if amount == gems => return self.policy(account_id),
                Some(_) => {
                    return Err(VaultError::IdempotencyConflict {
                        scope: "shield funding".to_string(),
                        correlation_id: correlation_id.to_string(),
                    })
                }
                None => {}
            }

            let mut policy = self
                .policies
                .get_mut(account_id)
                .ok_or_else(|| VaultError::AccountNotFound(account_id.clone()))?;
            policy.pool_balance_gems = policy
                .pool_balance_gems
                .checked_add(gems)
                .ok_or(VaultError::Overflow(Currency::Gems))?;
            self.fundings.insert(key.clone(), gems);

            tracing::debug!(account = %account_id, gems, pool = policy.pool_balance_gems, "Shield pool funded");
            Ok(policy.clone())
        })
    }

    /// Pay the covered part of a shortfall
    pub fn evaluate(
        &self,
        account_id: &AccountId,
        expected: u64,
        actual_verified: u64,
        correlation_id: &str,
    ) -> Result<ShieldOutcome> {
        let key = (account_id.clone(), correlation_id.to_string());

        self.ledger.transact(account_id, |book| {
            let previous = self.outcomes.get(&key).map(|o| o.clone());
            if let Some(mut outcome) = previous {
                if outcome.expected != expected || outcome.actual_verified != actual_verified {
                    return Err(VaultError::IdempotencyConflict {
                        scope: "shield evaluation".to_string(),
                        correlation_id: correlation_id.to_string(),
                    });
                }
                outcome.replayed = true;
                return Ok(outcome);
            }

            let policy = self.policy(account_id)?;
            let shortfall = expected.saturating_sub(actual_verified);
            let proportional =
                (shortfall as u128 * policy.coverage_percent as u128 / 100) as u64;
            let covered = shortfall.min(proportional).min(policy.pool_balance_gems);
            let pool_exhausted = covered < proportional;

            if covered > 0 {
                book.credit(Currency::Gems, covered, ReasonCode::ShieldTopUp, correlation_id)?;
            }

            let pool_remaining = policy.pool_balance_gems - covered;
            if let Some(mut stored) = self.policies.get_mut(account_id) {
                stored.pool_balance_gems = pool_remaining;
                stored.total_paid_gems = stored.total_paid_gems.saturating_add(covered);
            }

            if pool_exhausted {
                tracing::warn!(
                    account = %account_id,
                    shortfall,
                    owed = proportional,
                    paid = covered,
                    "Shield pool depleted"
                );
            }

            let outcome = ShieldOutcome {
                account_id: account_id.clone(),
                correlation_id: correlation_id.to_string(),
                expected,
                actual_verified,
                shortfall,
                coverage_percent: policy.coverage_percent,
                covered,
                pool_remaining,
                pool_exhausted,
                replayed: false,
            };
            self.outcomes.insert(key.clone(), outcome.clone());
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemvault_core::SystemClock;

    fn setup(coverage: u8, pool: u64) -> (Arc<Ledger>, ShieldEngine, AccountId) {
        let ledger = Arc::new(Ledger::new(Arc::new(SystemClock)));
        let account = AccountId::new("creator");
        ledger.open_account(account.clone(), Tier::Free).unwrap();
        let engine = ShieldEngine::new(ledger.clone(), CoverageTable::default());
        engine.enroll(&account).unwrap();
        engine.raise_coverage(&account, coverage).unwrap();
        if pool > 0 {
            engine.fund(&account, pool, "fund-0").unwrap();
        }
        (ledger, engine, account)
    }

    #[test]
    fn test_full_coverage_pays_shortfall() {
        let (ledger, engine, account) = setup(100, 1000);

        let outcome = engine.evaluate(&account, 500, 300, "e1").unwrap();
        assert_eq!(outcome.shortfall, 200);
        assert_eq!(outcome.covered, 200);
        assert_eq!(outcome.pool_remaining, 800);
        assert!(!outcome.pool_exhausted);
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 200);
    }

    #[test]
    fn test_half_coverage_pays_half() {
        let (_ledger, engine, account) = setup(50, 1000);
        let outcome = engine.evaluate(&account, 500, 300, "e1").unwrap();
        assert_eq!(outcome.covered, 100);
    }

    #[test]
    fn test_no_shortfall_pays_nothing() {
        let (ledger, engine, account) = setup(100, 1000);
        let outcome = engine.evaluate(&account, 500, 600, "e1").unwrap();
        assert_eq!(outcome.shortfall, 0);
        assert_eq!(outcome.covered, 0);
        assert!(!outcome.pool_exhausted);
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 0);
        assert!(ledger.entries(&account).unwrap().is_empty());
    }

    #[test]
    fn test_depleted_pool_pays_what_is_left() {
        let (ledger, engine, account) = setup(100, 50);

        let outcome = engine.evaluate(&account, 500, 300, "e1").unwrap();
        assert_eq!(outcome.covered, 50);
        assert!(outcome.pool_exhausted);

        let outcome = engine.evaluate(&account, 500, 300, "e2").unwrap();
        assert_eq!(outcome.covered, 0);
        assert_eq!(outcome.pool_remaining, 0);
        assert!(outcome.pool_exhausted);
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 50);
    }

    #[test]
    fn test_evaluate_retry_does_not_pay_twice() {
        let (ledger, engine, account) = setup(100, 1000);

        engine.evaluate(&account, 500, 300, "e1").unwrap();
        let retry = engine.evaluate(&account, 500, 300, "e1").unwrap();
        assert!(retry.replayed);
        assert_eq!(retry.covered, 200);
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 200);
        assert_eq!(engine.policy(&account).unwrap().pool_balance_gems, 800);

        assert!(matches!(
            engine.evaluate(&account, 900, 300, "e1"),
            Err(VaultError::IdempotencyConflict { .. })
        ));
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 200);
    }

    #[test]
    fn test_coverage_only_rises() {
        let (_ledger, engine, account) = setup(75, 0);
        assert_eq!(engine.raise_coverage(&account, 60).unwrap().coverage_percent, 75);
        assert_eq!(engine.raise_coverage(&account, 90).unwrap().coverage_percent, 90);
        assert_eq!(
            engine.raise_coverage(&account, 0),
            Err(VaultError::InvalidCoverage(0))
        );
        assert_eq!(
            engine.raise_coverage(&account, 101),
            Err(VaultError::InvalidCoverage(101))
        );
    }

    #[test]
    fn test_coverage_table() {
        let table = CoverageTable::default();
        assert_eq!(table.coverage_for(Tier::Free, &[]).unwrap(), 50);
        assert_eq!(
            table
                .coverage_for(Tier::Premium, &[LockPeriod::Days30, LockPeriod::Days90])
                .unwrap(),
            95
        );
        assert_eq!(table.coverage_for(Tier::Super, &[LockPeriod::Days60]).unwrap(), 100);
        assert!(CoverageTable::new([(Tier::Free, 0)], Vec::<(LockPeriod, u8)>::new()).is_err());
    }

    #[test]
    fn test_fund_idempotency() {
        let (_ledger, engine, account) = setup(100, 0);
        engine.fund(&account, 30, "f1").unwrap();
        let policy = engine.fund(&account, 30, "f1").unwrap();
        assert_eq!(policy.pool_balance_gems, 30);
        assert!(matches!(
            engine.fund(&account, 31, "f1"),
            Err(VaultError::IdempotencyConflict { .. })
        ));
    }
}
