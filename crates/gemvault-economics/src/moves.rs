//! # Moves Quota
//!
//! Advertiser plans buy a periodic allowance of "Moves"; each user action an
//! advertiser requests consumes one. A campaign action must consume its move
//! before any reward is computed for it, so an exhausted quota blocks the
//! reward outright.
//!
//! ## Plans
//!
//! | Plan | Moves per period | Price (gems) |
//! |------|------------------|--------------|
//! | starter | 100 | 50 |
//! | growth | 1,000 | 400 |
//! | scale | 10,000 | 3,000 |

use crate::constants::MOVES_PERIOD_DAYS;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use gemvault_core::{AccountId, Currency, Ledger, ReasonCode, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Advertiser plan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AdvertiserPlan {
    Starter,
    Growth,
    Scale,
}

impl AdvertiserPlan {
    pub const ALL: [AdvertiserPlan; 3] = [Self::Starter, Self::Growth, Self::Scale];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Growth => "growth",
            Self::Scale => "scale",
        }
    }

    pub fn default_terms(&self) -> PlanTerms {
        match self {
            Self::Starter => PlanTerms { moves: 100, price_gems: 50 },
            Self::Growth => PlanTerms { moves: 1_000, price_gems: 400 },
            Self::Scale => PlanTerms { moves: 10_000, price_gems: 3_000 },
        }
    }
}

impl fmt::Display for AdvertiserPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdvertiserPlan {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|plan| plan.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| VaultError::UnknownPlan(s.to_string()))
    }
}

impl TryFrom<String> for AdvertiserPlan {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// What a plan grants and costs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTerms {
    pub moves: u64,
    pub price_gems: u64,
}

/// Moves allowance for one advertiser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovesQuota {
    pub advertiser_id: AccountId,
    pub plan: Option<AdvertiserPlan>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub allotted: u64,
    pub consumed: u64,
}

impl MovesQuota {
    pub fn remaining(&self) -> u64 {
        self.allotted.saturating_sub(self.consumed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Moves quota tracker
pub struct MovesTracker {
    ledger: Arc<Ledger>,
    plans: BTreeMap<AdvertiserPlan, PlanTerms>,
    period: Duration,
    quotas: DashMap<AccountId, MovesQuota>,
    /// Plan bought under each purchase key
    purchases: DashMap<(AccountId, String), AdvertiserPlan>,
}

impl MovesTracker {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            plans: AdvertiserPlan::ALL
                .into_iter()
                .map(|plan| (plan, plan.default_terms()))
                .collect(),
            period: Duration::days(MOVES_PERIOD_DAYS),
            quotas: DashMap::new(),
            purchases: DashMap::new(),
        }
    }

    pub fn with_plans(mut self, plans: impl IntoIterator<Item = (AdvertiserPlan, PlanTerms)>) -> Self {
        self.plans.extend(plans);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn terms(&self, plan: AdvertiserPlan) -> Result<PlanTerms> {
        self.plans
            .get(&plan)
            .copied()
            .ok_or_else(|| VaultError::UnknownPlan(plan.name().to_string()))
    }

    pub fn plans(&self) -> impl Iterator<Item = (AdvertiserPlan, PlanTerms)> + '_ {
        self.plans.iter().map(|(p, t)| (*p, *t))
    }

    /// Start a fresh period with `allotted` moves, replacing any existing quota
    pub fn open(&self, advertiser_id: &AccountId, allotted: u64) -> MovesQuota {
        let now = self.ledger.now();
        let quota = MovesQuota {
            advertiser_id: advertiser_id.clone(),
            plan: None,
            period_start: now,
            period_end: now + self.period,
            allotted,
            consumed: 0,
        };
        self.quotas.insert(advertiser_id.clone(), quota.clone());
        tracing::info!(advertiser = %advertiser_id, allotted, "Moves quota opened");
        quota
    }

    /// Buy a plan with gems from the advertiser's ledger account
    ///
    /// The moves are added to the current period. A retry of the same plan
    /// with the same correlation id changes nothing; any other reuse of the
    /// key is an `IdempotencyConflict`.
    pub fn purchase(
        &self,
        advertiser_id: &AccountId,
        plan: AdvertiserPlan,
        correlation_id: &str,
    ) -> Result<MovesQuota> {
        let terms = self.terms(plan)?;
        let key = (advertiser_id.clone(), correlation_id.to_string());
        let conflict = || VaultError::IdempotencyConflict {
            scope: "moves purchase".to_string(),
            correlation_id: correlation_id.to_string(),
        };

        self.ledger.transact(advertiser_id, |book| {
            let previous = self.purchases.get(&key).map(|p| *p.value());
            match previous {
                Some(bought) if bought == plan => return self.quota(advertiser_id),
                Some(_) => return Err(conflict()),
                None => {}
            }
            if book.receipt(Currency::Gems, correlation_id).is_some() {
                return Err(conflict());
            }

            book.debit(Currency::Gems, terms.price_gems, ReasonCode::MovesPurchase, correlation_id)?;

            let now = book.now();
            let mut quota = self
                .quotas
                .entry(advertiser_id.clone())
                .or_insert_with(|| MovesQuota {
                    advertiser_id: advertiser_id.clone(),
                    plan: None,
                    period_start: now,
                    period_end: now + self.period,
                    allotted: 0,
                    consumed: 0,
                });
            quota.plan = Some(plan);
            quota.allotted = quota.allotted.saturating_add(terms.moves);
            self.purchases.insert(key.clone(), plan);

            tracing::info!(
                advertiser = %advertiser_id,
                %plan,
                moves = terms.moves,
                price = terms.price_gems,
                allotted = quota.allotted,
                "Moves plan purchased"
            );
            Ok(quota.clone())
        })
    }

    /// Take `amount` moves, returning what is left
    pub fn consume(&self, advertiser_id: &AccountId, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount(0));
        }
        let mut quota = self
            .quotas
            .get_mut(advertiser_id)
            .ok_or_else(|| VaultError::QuotaNotFound(advertiser_id.clone()))?;

        let remaining = quota.remaining();
        if amount > remaining {
            tracing::debug!(advertiser = %advertiser_id, remaining, requested = amount, "Moves quota exhausted");
            return Err(VaultError::QuotaExhausted {
                advertiser: advertiser_id.clone(),
                remaining,
                requested: amount,
            });
        }

        quota.consumed += amount;
        let remaining = quota.remaining();
        if remaining == 0 {
            tracing::info!(advertiser = %advertiser_id, allotted = quota.allotted, "Moves quota used up");
        }
        Ok(remaining)
    }

    /// Give back moves taken for an action that did not complete
    pub fn refund(&self, advertiser_id: &AccountId, amount: u64) -> Result<u64> {
        let mut quota = self
            .quotas
            .get_mut(advertiser_id)
            .ok_or_else(|| VaultError::QuotaNotFound(advertiser_id.clone()))?;
        quota.consumed = quota.consumed.saturating_sub(amount);
        Ok(quota.remaining())
    }

    /// Zero consumption and roll the period forward (billing-cycle trigger)
    pub fn reset(&self, advertiser_id: &AccountId) -> Result<MovesQuota> {
        let mut quota = self
            .quotas
            .get_mut(advertiser_id)
            .ok_or_else(|| VaultError::QuotaNotFound(advertiser_id.clone()))?;

        quota.consumed = 0;
        quota.period_start = quota.period_end;
        quota.period_end = quota.period_end + self.period;

        tracing::info!(
            advertiser = %advertiser_id,
            period_end = %quota.period_end,
            "Moves quota reset"
        );
        Ok(quota.clone())
    }

    pub fn quota(&self, advertiser_id: &AccountId) -> Result<MovesQuota> {
        self.quotas
            .get(advertiser_id)
            .map(|q| q.clone())
            .ok_or_else(|| VaultError::QuotaNotFound(advertiser_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemvault_core::{SystemClock, Tier};

    fn setup() -> (Arc<Ledger>, MovesTracker, AccountId) {
        let ledger = Arc::new(Ledger::new(Arc::new(SystemClock)));
        let advertiser = AccountId::new("brand");
        ledger.open_account(advertiser.clone(), Tier::Free).unwrap();
        let tracker = MovesTracker::new(ledger.clone());
        (ledger, tracker, advertiser)
    }

    #[test]
    fn test_hundred_and_one_consumes() {
        let (_ledger, tracker, advertiser) = setup();
        tracker.open(&advertiser, 100);

        let mut ok = 0;
        let mut exhausted = 0;
        for _ in 0..101 {
            match tracker.consume(&advertiser, 1) {
                Ok(_) => ok += 1,
                Err(VaultError::QuotaExhausted { .. }) => exhausted += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 100);
        assert_eq!(exhausted, 1);

        let quota = tracker.quota(&advertiser).unwrap();
        assert_eq!(quota.consumed, 100);
        assert!(quota.is_exhausted());
    }

    #[test]
    fn test_consume_never_exceeds_allotment() {
        let (_ledger, tracker, advertiser) = setup();
        tracker.open(&advertiser, 10);

        assert_eq!(tracker.consume(&advertiser, 7).unwrap(), 3);
        assert_eq!(
            tracker.consume(&advertiser, 4),
            Err(VaultError::QuotaExhausted {
                advertiser: advertiser.clone(),
                remaining: 3,
                requested: 4,
            })
        );
        assert_eq!(tracker.quota(&advertiser).unwrap().consumed, 7);
        assert_eq!(tracker.consume(&advertiser, 0), Err(VaultError::InvalidAmount(0)));
    }

    #[test]
    fn test_reset_rolls_period() {
        let (_ledger, tracker, advertiser) = setup();
        let opened = tracker.open(&advertiser, 5);
        tracker.consume(&advertiser, 5).unwrap();

        let reset = tracker.reset(&advertiser).unwrap();
        assert_eq!(reset.consumed, 0);
        assert_eq!(reset.period_start, opened.period_end);
        assert_eq!(reset.period_end, opened.period_end + Duration::days(30));
        assert_eq!(tracker.consume(&advertiser, 1).unwrap(), 4);
    }

    #[test]
    fn test_refund_returns_moves() {
        let (_ledger, tracker, advertiser) = setup();
        tracker.open(&advertiser, 2);
        tracker.consume(&advertiser, 2).unwrap();

        assert_eq!(tracker.refund(&advertiser, 1).unwrap(), 1);
        assert_eq!(tracker.refund(&advertiser, 5).unwrap(), 2);
    }

    #[test]
    fn test_purchase_escrows_gems() {
        let (ledger, tracker, advertiser) = setup();
        ledger
            .credit(&advertiser, Currency::Gems, 500, ReasonCode::Manual("top_up".into()), "seed")
            .unwrap();

        let quota = tracker.purchase(&advertiser, AdvertiserPlan::Growth, "p1").unwrap();
        assert_eq!(quota.allotted, 1_000);
        assert_eq!(quota.plan, Some(AdvertiserPlan::Growth));
        assert_eq!(ledger.balance(&advertiser, Currency::Gems).unwrap(), 100);

        // Retry changes nothing
        let retry = tracker.purchase(&advertiser, AdvertiserPlan::Growth, "p1").unwrap();
        assert_eq!(retry.allotted, 1_000);
        assert_eq!(ledger.balance(&advertiser, Currency::Gems).unwrap(), 100);

        // Not enough gems for another growth plan
        assert!(matches!(
            tracker.purchase(&advertiser, AdvertiserPlan::Growth, "p2"),
            Err(VaultError::InsufficientBalance { .. })
        ));
        assert_eq!(tracker.quota(&advertiser).unwrap().allotted, 1_000);

        // Starter tops up the current period
        let quota = tracker.purchase(&advertiser, AdvertiserPlan::Starter, "p3").unwrap();
        assert_eq!(quota.allotted, 1_100);
        assert_eq!(ledger.balance(&advertiser, Currency::Gems).unwrap(), 50);
    }

    #[test]
    fn test_purchase_key_used_by_other_posting() {
        let (ledger, tracker, advertiser) = setup();
        ledger
            .credit(&advertiser, Currency::Gems, 500, ReasonCode::Manual("top_up".into()), "order-7")
            .unwrap();

        assert!(matches!(
            tracker.purchase(&advertiser, AdvertiserPlan::Growth, "order-7"),
            Err(VaultError::IdempotencyConflict { .. })
        ));
        assert_eq!(ledger.balance(&advertiser, Currency::Gems).unwrap(), 500);
        assert!(tracker.quota(&advertiser).is_err());

        tracker.purchase(&advertiser, AdvertiserPlan::Starter, "order-8").unwrap();
        assert!(matches!(
            tracker.purchase(&advertiser, AdvertiserPlan::Growth, "order-8"),
            Err(VaultError::IdempotencyConflict { .. })
        ));
        assert_eq!(tracker.quota(&advertiser).unwrap().allotted, 100);
        assert_eq!(ledger.balance(&advertiser, Currency::Gems).unwrap(), 450);
    }

    #[test]
    fn test_unknown_quota_and_plan() {
        let (_ledger, tracker, advertiser) = setup();
        assert_eq!(
            tracker.consume(&advertiser, 1),
            Err(VaultError::QuotaNotFound(advertiser.clone()))
        );
        assert_eq!(
            "enterprise".parse::<AdvertiserPlan>(),
            Err(VaultError::UnknownPlan("enterprise".to_string()))
        );
    }
}
