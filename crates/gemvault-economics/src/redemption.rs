//! # Reward Redemption
//!
//! Lifecycle of an earned reward:
//!
//! ```text
//!              ┌──► redeemed   (redeem succeeded)
//!  available ──┼──► expired    (now > expires_at)
//!              └──► depleted   (source pool ran out)
//! ```
//!
//! Every transition is one-way. Redeeming a `credit` reward pays its face
//! value in gems; coupons and giveaways are fulfilled outside the ledger.

use crate::constants::REWARD_TTL_DAYS;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use gemvault_core::{AccountId, Currency, Ledger, ReasonCode, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of reward
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Coupon,
    Giveaway,
    /// Pays `face_value` gems on redemption
    Credit,
}

/// Reward status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Available,
    Redeemed,
    Expired,
    Depleted,
}

impl RewardStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Available)
    }
}

/// Earned reward
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAssignment {
    pub assignment_id: Uuid,
    pub account_id: AccountId,
    /// Campaign or catalogue the reward came from
    pub source: String,
    pub reward_type: RewardType,
    pub face_value: u64,
    pub status: RewardStatus,
    pub earned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// Redemption desk
pub struct RedemptionDesk {
    ledger: Arc<Ledger>,
    default_ttl: Duration,
    assignments: DashMap<Uuid, RewardAssignment>,
    /// Remaining supply per limited source
    pools: DashMap<String, u64>,
    /// Assignment idempotency keys
    by_correlation: DashMap<(AccountId, String), Uuid>,
}

impl RedemptionDesk {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            default_ttl: Duration::days(REWARD_TTL_DAYS),
            assignments: DashMap::new(),
            pools: DashMap::new(),
            by_correlation: DashMap::new(),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Limit how many rewards from `source` can be redeemed
    pub fn register_pool(&self, source: &str, supply: u64) {
        self.pools.insert(source.to_string(), supply);
        tracing::info!(source, supply, "Reward pool registered");
    }

    /// Remaining supply, `None` for unlimited sources
    pub fn pool_remaining(&self, source: &str) -> Option<u64> {
        self.pools.get(source).map(|r| *r.value())
    }

    /// Grant a reward to an account
    ///
    /// With a correlation id, a retry returns the first assignment instead of
    /// creating another one.
    pub fn assign(
        &self,
        account_id: &AccountId,
        source: &str,
        reward_type: RewardType,
        face_value: u64,
        ttl: Option<Duration>,
        correlation_id: Option<&str>,
    ) -> Result<RewardAssignment> {
        if reward_type == RewardType::Credit && face_value == 0 {
            return Err(VaultError::InvalidAmount(0));
        }
        let key = correlation_id.map(|corr| (account_id.clone(), corr.to_string()));

        self.ledger.transact(account_id, |book| {
            if let Some(key) = &key {
                let existing = self.by_correlation.get(key).map(|id| *id.value());
                if let Some(assignment_id) = existing {
                    let assignment = self.assignment(&assignment_id)?;
                    if assignment.source != source
                        || assignment.reward_type != reward_type
                        || assignment.face_value != face_value
                    {
                        return Err(VaultError::IdempotencyConflict {
                            scope: "reward assignment".to_string(),
                            correlation_id: key.1.clone(),
                        });
                    }
                    return Ok(assignment);
                }
            }

            let now = book.now();
            let assignment = RewardAssignment {
                assignment_id: Uuid::new_v4(),
                account_id: account_id.clone(),
                source: source.to_string(),
                reward_type,
                face_value,
                status: RewardStatus::Available,
                earned_at: now,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                redeemed_at: None,
            };
            self.assignments
                .insert(assignment.assignment_id, assignment.clone());
            if let Some(key) = &key {
                self.by_correlation.insert(key.clone(), assignment.assignment_id);
            }

            tracing::debug!(
                account = %account_id,
                assignment = %assignment.assignment_id,
                source,
                "Reward assigned"
            );
            Ok(assignment)
        })
    }

    /// Redeem an available reward
    pub fn redeem(&self, assignment_id: &Uuid) -> Result<RewardAssignment> {
        let id = assignment_id.to_string();
        let account_id = self
            .assignments
            .get(assignment_id)
            .map(|a| a.account_id.clone())
            .ok_or_else(|| VaultError::AssignmentNotFound(id.clone()))?;

        let (redeemed, source_drained) = self.ledger.transact(&account_id, |book| {
            let now = book.now();
            let mut assignment = self
                .assignments
                .get_mut(assignment_id)
                .ok_or_else(|| VaultError::AssignmentNotFound(id.clone()))?;

            match assignment.status {
                RewardStatus::Available => {}
                RewardStatus::Redeemed => return Err(VaultError::AlreadyRedeemed(id.clone())),
                RewardStatus::Expired => return Err(VaultError::Expired(id.clone())),
                RewardStatus::Depleted => return Err(VaultError::Depleted(id.clone())),
            }

            if now > assignment.expires_at {
                assignment.status = RewardStatus::Expired;
                tracing::debug!(assignment = %assignment_id, "Reward expired at redemption");
                return Err(VaultError::Expired(id.clone()));
            }

            let mut pool = self.pools.get_mut(&assignment.source);
            if let Some(remaining) = pool.as_deref() {
                if *remaining == 0 {
                    assignment.status = RewardStatus::Depleted;
                    return Err(VaultError::Depleted(id.clone()));
                }
            }

            if assignment.reward_type == RewardType::Credit {
                book.credit(
                    Currency::Gems,
                    assignment.face_value,
                    ReasonCode::Redemption,
                    &format!("redeem:{assignment_id}"),
                )?;
            }

            let drained = match pool.as_deref_mut() {
                Some(remaining) => {
                    *remaining -= 1;
                    *remaining == 0
                }
                None => false,
            };

            assignment.status = RewardStatus::Redeemed;
            assignment.redeemed_at = Some(now);
            Ok((assignment.clone(), drained))
        })?;

        tracing::info!(
            account = %account_id,
            assignment = %assignment_id,
            reward_type = ?redeemed.reward_type,
            face_value = redeemed.face_value,
            "Reward redeemed"
        );

        if source_drained {
            self.deplete_source(&redeemed.source);
        }
        Ok(redeemed)
    }

    /// Move every available reward of a drained source to `depleted`
    pub fn deplete_source(&self, source: &str) -> Vec<RewardAssignment> {
        let mut depleted = Vec::new();
        for mut assignment in self.assignments.iter_mut() {
            if assignment.source == source && assignment.status == RewardStatus::Available {
                assignment.status = RewardStatus::Depleted;
                depleted.push(assignment.clone());
            }
        }
        if !depleted.is_empty() {
            tracing::info!(source, count = depleted.len(), "Reward source depleted");
        }
        depleted
    }

    /// Expire every available reward past its deadline
    pub fn expire_due(&self) -> Vec<RewardAssignment> {
        let now = self.ledger.now();
        let mut expired = Vec::new();
        for mut assignment in self.assignments.iter_mut() {
            if assignment.status == RewardStatus::Available && now > assignment.expires_at {
                assignment.status = RewardStatus::Expired;
                expired.push(assignment.clone());
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Rewards expired");
        }
        expired
    }

    pub fn assignment(&self, assignment_id: &Uuid) -> Result<RewardAssignment> {
        self.assignments
            .get(assignment_id)
            .map(|a| a.clone())
            .ok_or_else(|| VaultError::AssignmentNotFound(assignment_id.to_string()))
    }

    /// Rewards held by an account, newest first
    pub fn assignments_for(&self, account_id: &AccountId) -> Vec<RewardAssignment> {
        let mut assignments: Vec<_> = self
            .assignments
            .iter()
            .filter(|a| &a.account_id == account_id)
            .map(|a| a.clone())
            .collect();
        assignments.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemvault_core::{ManualClock, Tier};

    fn setup() -> (Arc<ManualClock>, Arc<Ledger>, RedemptionDesk, AccountId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let account = AccountId::new("fan");
        ledger.open_account(account.clone(), Tier::Free).unwrap();
        let desk = RedemptionDesk::new(ledger.clone());
        (clock, ledger, desk, account)
    }

    #[test]
    fn test_redeem_twice() {
        let (_clock, _ledger, desk, account) = setup();
        let reward = desk
            .assign(&account, "spring-drop", RewardType::Coupon, 10, None, None)
            .unwrap();

        let redeemed = desk.redeem(&reward.assignment_id).unwrap();
        assert_eq!(redeemed.status, RewardStatus::Redeemed);
        assert!(redeemed.redeemed_at.is_some());

        assert_eq!(
            desk.redeem(&reward.assignment_id),
            Err(VaultError::AlreadyRedeemed(reward.assignment_id.to_string()))
        );
    }

    #[test]
    fn test_expired_reward_cannot_be_redeemed() {
        let (clock, ledger, desk, account) = setup();
        let reward = desk
            .assign(&account, "flash", RewardType::Credit, 25, Some(Duration::days(1)), None)
            .unwrap();

        clock.advance(Duration::days(2));
        assert_eq!(
            desk.redeem(&reward.assignment_id),
            Err(VaultError::Expired(reward.assignment_id.to_string()))
        );
        assert_eq!(
            desk.assignment(&reward.assignment_id).unwrap().status,
            RewardStatus::Expired
        );
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 0);
    }

    #[test]
    fn test_credit_reward_pays_gems() {
        let (_clock, ledger, desk, account) = setup();
        let reward = desk
            .assign(&account, "referral", RewardType::Credit, 40, None, None)
            .unwrap();

        desk.redeem(&reward.assignment_id).unwrap();
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 40);
        let entries = ledger.entries(&account).unwrap();
        assert_eq!(entries[0].reason, ReasonCode::Redemption);
    }

    #[test]
    fn test_pool_depletion() {
        let (_clock, _ledger, desk, account) = setup();
        desk.register_pool("limited", 1);

        let first = desk.assign(&account, "limited", RewardType::Coupon, 5, None, None).unwrap();
        let second = desk.assign(&account, "limited", RewardType::Coupon, 5, None, None).unwrap();
        let other = desk.assign(&account, "open", RewardType::Giveaway, 1, None, None).unwrap();

        desk.redeem(&first.assignment_id).unwrap();
        assert_eq!(desk.pool_remaining("limited"), Some(0));
        assert_eq!(
            desk.assignment(&second.assignment_id).unwrap().status,
            RewardStatus::Depleted
        );
        assert_eq!(
            desk.redeem(&second.assignment_id),
            Err(VaultError::Depleted(second.assignment_id.to_string()))
        );
        assert_eq!(
            desk.assignment(&other.assignment_id).unwrap().status,
            RewardStatus::Available
        );
    }

    #[test]
    fn test_assign_to_empty_pool_then_redeem() {
        let (_clock, _ledger, desk, account) = setup();
        desk.register_pool("sold-out", 0);
        let reward = desk.assign(&account, "sold-out", RewardType::Coupon, 5, None, None).unwrap();

        assert_eq!(
            desk.redeem(&reward.assignment_id),
            Err(VaultError::Depleted(reward.assignment_id.to_string()))
        );
        assert_eq!(
            desk.assignment(&reward.assignment_id).unwrap().status,
            RewardStatus::Depleted
        );
    }

    #[test]
    fn test_expire_due_sweep() {
        let (clock, _ledger, desk, account) = setup();
        let short = desk
            .assign(&account, "a", RewardType::Coupon, 1, Some(Duration::hours(1)), None)
            .unwrap();
        let long = desk.assign(&account, "b", RewardType::Coupon, 1, None, None).unwrap();
        let redeemed = desk
            .assign(&account, "c", RewardType::Coupon, 1, Some(Duration::hours(1)), None)
            .unwrap();
        desk.redeem(&redeemed.assignment_id).unwrap();

        clock.advance(Duration::hours(2));
        let expired = desk.expire_due();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].assignment_id, short.assignment_id);
        assert_eq!(desk.assignment(&long.assignment_id).unwrap().status, RewardStatus::Available);
        assert_eq!(
            desk.assignment(&redeemed.assignment_id).unwrap().status,
            RewardStatus::Redeemed
        );
    }

    #[test]
    fn test_assign_retry_creates_one_reward() {
        let (_clock, ledger, desk, account) = setup();
        let first = desk
            .assign(&account, "referral", RewardType::Credit, 40, None, Some("ref-1"))
            .unwrap();
        let retry = desk
            .assign(&account, "referral", RewardType::Credit, 40, None, Some("ref-1"))
            .unwrap();
        assert_eq!(first.assignment_id, retry.assignment_id);
        assert_eq!(desk.assignments_for(&account).len(), 1);

        assert!(matches!(
            desk.assign(&account, "referral", RewardType::Credit, 400, None, Some("ref-1")),
            Err(VaultError::IdempotencyConflict { .. })
        ));

        desk.redeem(&first.assignment_id).unwrap();
        assert!(desk.redeem(&retry.assignment_id).is_err());
        assert_eq!(ledger.balance(&account, Currency::Gems).unwrap(), 40);
    }

    #[test]
    fn test_assign_requires_account() {
        let (_clock, _ledger, desk, _account) = setup();
        let ghost = AccountId::new("ghost");
        assert_eq!(
            desk.assign(&ghost, "x", RewardType::Coupon, 1, None, None),
            Err(VaultError::AccountNotFound(ghost))
        );
    }
}
