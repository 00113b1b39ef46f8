//! # Reward Service
//!
//! Owns the ledger and every rule engine for one process, and turns engine
//! outcomes into events and metrics. Callers (the JSON surface, the CLI,
//! tests) only talk to [`RewardService`].

use crate::config::ServiceConfig;
use crate::events::{EventBus, VaultEvent};
use crate::metrics::VaultMetrics;
use chrono::Duration;
use dashmap::DashMap;
use gemvault_core::{
    AccountId, AccountSnapshot, Balances, Clock, Currency, Ledger, LedgerReceipt, ReasonCode,
    Result, SystemClock, Tier, VaultError,
};
use gemvault_economics::{
    ActionType, AdvertiserPlan, MovesQuota, MovesTracker, RedemptionDesk, RewardAssignment,
    RewardCalculator, RewardQuote, RewardType, ShieldEngine, ShieldOutcome, ShieldPolicy,
    StakeManager, StakePosition,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reward grant request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub account_id: AccountId,
    pub action_type: ActionType,
    #[serde(default)]
    pub is_external: bool,
    /// Advertiser whose campaign quota pays for the action
    #[serde(default)]
    pub campaign: Option<AccountId>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Result of a reward grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub account_id: AccountId,
    pub correlation_id: String,
    pub quote: RewardQuote,
    /// Campaign moves left after this grant
    pub moves_remaining: Option<u64>,
    pub balances_after: Balances,
    pub replayed: bool,
}

/// Everything known about one account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: AccountSnapshot,
    pub shield: Option<ShieldPolicy>,
    pub stakes: Vec<StakePosition>,
    pub escrowed_gems: u64,
    pub moves: Option<MovesQuota>,
    pub rewards: Vec<RewardAssignment>,
}

/// A committed grant and the request that produced it
struct GrantRecord {
    action: ActionType,
    is_external: bool,
    campaign: Option<AccountId>,
    grant: RewardGrant,
}

impl GrantRecord {
    fn matches(&self, request: &GrantRequest) -> bool {
        self.action == request.action_type
            && self.is_external == request.is_external
            && self.campaign == request.campaign
    }
}

/// Reward & protection service
pub struct RewardService {
    config: ServiceConfig,
    ledger: Arc<Ledger>,
    calculator: RewardCalculator,
    stakes: StakeManager,
    shield: ShieldEngine,
    moves: MovesTracker,
    redemption: RedemptionDesk,
    events: EventBus,
    metrics: Option<Arc<VaultMetrics>>,
    grants: DashMap<(AccountId, String), GrantRecord>,
}

impl RewardService {
    /// Create a service on the system clock
    pub fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a service reading time from `clock`
    pub fn with_clock(config: ServiceConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = if config.metrics.enabled {
            Some(Arc::new(VaultMetrics::new()?))
        } else {
            None
        };

        let mut ledger = Ledger::new(clock);
        if let Some(metrics) = &metrics {
            ledger = ledger.with_observer(metrics.clone());
        }
        let ledger = Arc::new(ledger);

        let calculator = config.reward_calculator()?;
        let shield = ShieldEngine::new(ledger.clone(), config.coverage_table()?);
        let moves = MovesTracker::new(ledger.clone())
            .with_plans(config.plan_terms())
            .with_period(Duration::days(config.moves.period_days));
        let redemption = RedemptionDesk::new(ledger.clone())
            .with_default_ttl(Duration::days(config.redemption.default_ttl_days));
        for (source, supply) in &config.redemption.pools {
            redemption.register_pool(source, *supply);
        }

        tracing::info!(
            metrics = config.metrics.enabled,
            pools = config.redemption.pools.len(),
            "Reward service ready"
        );

        Ok(Self {
            events: EventBus::new(config.events.capacity),
            stakes: StakeManager::new(ledger.clone()),
            config,
            ledger,
            calculator,
            shield,
            moves,
            redemption,
            metrics,
            grants: DashMap::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn calculator(&self) -> &RewardCalculator {
        &self.calculator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Option<&VaultMetrics> {
        self.metrics.as_deref()
    }

    /// Prometheus text exposition, empty when metrics are disabled
    pub fn render_metrics(&self) -> String {
        self.metrics.as_ref().map(|m| m.render()).unwrap_or_default()
    }

    /// Count an operation outcome
    pub fn record(&self, op: &str, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(op, ok);
        }
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Open an account and enroll it in the shield at its tier coverage
    pub fn open_account(&self, account_id: AccountId, tier: Tier) -> Result<AccountSnapshot> {
        let snapshot = self.ledger.open_account(account_id.clone(), tier)?;
        self.shield.enroll(&account_id)?;
        if let Some(metrics) = &self.metrics {
            metrics.set_accounts(self.ledger.account_count());
        }
        Ok(snapshot)
    }

    pub fn account(&self, account_id: &AccountId) -> Result<AccountView> {
        let account = self.ledger.account(account_id)?;
        Ok(AccountView {
            account,
            shield: self.shield.policy(account_id).ok(),
            stakes: self.stakes.positions_for(account_id),
            escrowed_gems: self.stakes.escrowed(account_id),
            moves: self.moves.quota(account_id).ok(),
            rewards: self.redemption.assignments_for(account_id),
        })
    }

    /// Change tier and lift shield coverage to match
    pub fn set_tier(&self, account_id: &AccountId, tier: Tier) -> Result<AccountSnapshot> {
        let previous = self.ledger.set_tier(account_id, tier)?;
        self.refresh_shield(account_id)?;
        if previous != tier {
            self.events.publish(VaultEvent::TierChanged {
                account_id: account_id.clone(),
                from: previous,
                to: tier,
            });
        }
        self.ledger.account(account_id)
    }

    fn refresh_shield(&self, account_id: &AccountId) -> Result<ShieldPolicy> {
        let tier = self.ledger.inspect(account_id, |book| book.tier())?;
        let locks = self.stakes.open_locks(account_id);
        self.shield.refresh_coverage(account_id, tier, &locks)
    }

    // ------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------

    /// Quote a reward without crediting anything
    pub fn compute_reward(
        &self,
        action: ActionType,
        is_external: bool,
        tier: Tier,
    ) -> Result<RewardQuote> {
        self.calculator.compute(action, is_external, tier)
    }

    /// Compute and credit the reward for an action at the account's tier
    ///
    /// Campaign actions take one move from the advertiser's quota first; an
    /// exhausted quota rejects the grant before anything is credited.
    pub fn grant_reward(&self, request: GrantRequest) -> Result<RewardGrant> {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = (request.account_id.clone(), correlation_id.clone());
        let account_id = &request.account_id;

        let grant = self.ledger.transact(account_id, |book| {
            if let Some(record) = self.grants.get(&key) {
                if !record.matches(&request) {
                    return Err(VaultError::IdempotencyConflict {
                        scope: "reward grant".to_string(),
                        correlation_id: correlation_id.clone(),
                    });
                }
                let mut grant = record.grant.clone();
                grant.replayed = true;
                return Ok(grant);
            }

            let moves_remaining = match &request.campaign {
                Some(campaign) => Some(self.moves.consume(campaign, 1)?),
                None => None,
            };

            let credited = self
                .calculator
                .compute(request.action_type, request.is_external, book.tier())
                .and_then(|quote| {
                    for (currency, amount) in [
                        (Currency::Points, quote.points),
                        (Currency::Gems, quote.gems),
                        (Currency::Keys, quote.keys),
                    ] {
                        if amount > 0 {
                            book.credit(currency, amount, ReasonCode::RewardGrant, &correlation_id)?;
                        }
                    }
                    Ok(quote)
                });

            let quote = match credited {
                Ok(quote) => quote,
                Err(err) => {
                    if let Some(campaign) = &request.campaign {
                        if let Err(refund_err) = self.moves.refund(campaign, 1) {
                            tracing::warn!(
                                advertiser = %campaign,
                                correlation_id = %correlation_id,
                                error = %refund_err,
                                "Move refund failed"
                            );
                        }
                    }
                    return Err(err);
                }
            };

            let grant = RewardGrant {
                account_id: account_id.clone(),
                correlation_id: correlation_id.clone(),
                quote,
                moves_remaining,
                balances_after: book.balances(),
                replayed: false,
            };
            self.grants.insert(
                key.clone(),
                GrantRecord {
                    action: request.action_type,
                    is_external: request.is_external,
                    campaign: request.campaign.clone(),
                    grant: grant.clone(),
                },
            );
            Ok(grant)
        })?;

        if !grant.replayed {
            tracing::info!(
                account = %account_id,
                action = %request.action_type,
                external = request.is_external,
                points = grant.quote.points,
                gems = grant.quote.gems,
                keys = grant.quote.keys,
                correlation_id = %grant.correlation_id,
                "Reward granted"
            );
            self.events.publish(VaultEvent::RewardGranted {
                account_id: account_id.clone(),
                action: request.action_type,
                is_external: request.is_external,
                campaign: request.campaign.clone(),
                points: grant.quote.points,
                gems: grant.quote.gems,
                keys: grant.quote.keys,
                correlation_id: grant.correlation_id.clone(),
            });
            if let (Some(campaign), Some(0)) = (&request.campaign, grant.moves_remaining) {
                self.publish_moves_exhausted(campaign);
            }
        }
        Ok(grant)
    }

    /// Grant a coupon, giveaway or credit reward
    pub fn assign_reward(
        &self,
        account_id: &AccountId,
        source: &str,
        reward_type: RewardType,
        face_value: u64,
        ttl_days: Option<i64>,
        correlation_id: Option<&str>,
    ) -> Result<RewardAssignment> {
        self.redemption.assign(
            account_id,
            source,
            reward_type,
            face_value,
            ttl_days.map(Duration::days),
            correlation_id,
        )
    }

    pub fn redeem_reward(&self, assignment_id: &Uuid) -> Result<RewardAssignment> {
        let redeemed = self.redemption.redeem(assignment_id)?;
        self.events.publish(VaultEvent::RewardRedeemed {
            account_id: redeemed.account_id.clone(),
            assignment_id: redeemed.assignment_id,
            reward_type: redeemed.reward_type,
            face_value: redeemed.face_value,
        });
        Ok(redeemed)
    }

    /// Expire overdue rewards and flag due stakes as matured
    pub fn expire_due(&self) -> Vec<RewardAssignment> {
        let expired = self.redemption.expire_due();
        for assignment in &expired {
            self.events.publish(VaultEvent::RewardExpired {
                account_id: assignment.account_id.clone(),
                assignment_id: assignment.assignment_id,
            });
        }
        self.stakes.mark_matured();
        expired
    }

    pub fn register_pool(&self, source: &str, supply: u64) {
        self.redemption.register_pool(source, supply);
    }

    pub fn assignment(&self, assignment_id: &Uuid) -> Result<RewardAssignment> {
        self.redemption.assignment(assignment_id)
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    pub fn credit(
        &self,
        account_id: &AccountId,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        self.ledger
            .credit(account_id, currency, amount, reason, correlation_id)
    }

    pub fn debit(
        &self,
        account_id: &AccountId,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        self.ledger
            .debit(account_id, currency, amount, reason, correlation_id)
    }

    pub fn audit(&self, account_id: &AccountId) -> Result<AccountSnapshot> {
        self.ledger.audit(account_id)
    }

    // ------------------------------------------------------------------
    // Staking
    // ------------------------------------------------------------------

    /// Escrow gems in a stake; open stakes raise shield coverage
    pub fn create_stake(
        &self,
        account_id: &AccountId,
        gems: u64,
        lock_days: u32,
        correlation_id: Option<String>,
    ) -> Result<StakePosition> {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let existed = self
            .stakes
            .find_by_correlation(account_id, &correlation_id)
            .is_some();

        let position = self.stakes.stake(account_id, gems, lock_days, &correlation_id)?;
        if !existed {
            self.refresh_shield(account_id)?;
            self.events.publish(VaultEvent::StakeCreated {
                account_id: account_id.clone(),
                position_id: position.position_id,
                principal_gems: position.principal_gems,
                lock_days: position.lock_days.days(),
                matures_at: position.matures_at,
            });
        }
        Ok(position)
    }

    pub fn withdraw_stake(&self, position_id: &Uuid) -> Result<StakePosition> {
        let position = self.stakes.withdraw(position_id)?;
        self.events.publish(VaultEvent::StakeWithdrawn {
            account_id: position.account_id.clone(),
            position_id: position.position_id,
            payout_gems: position.payout_gems.unwrap_or_default(),
        });
        Ok(position)
    }

    pub fn stake(&self, position_id: &Uuid) -> Result<StakePosition> {
        self.stakes.position(position_id)
    }

    // ------------------------------------------------------------------
    // Shield
    // ------------------------------------------------------------------

    /// Pay the covered part of an earnings shortfall
    pub fn evaluate_shield(
        &self,
        account_id: &AccountId,
        expected: u64,
        actual_verified: u64,
        correlation_id: Option<String>,
    ) -> Result<ShieldOutcome> {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let outcome = self
            .shield
            .evaluate(account_id, expected, actual_verified, &correlation_id)?;
        if outcome.replayed {
            return Ok(outcome);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_shield_payout(outcome.covered, outcome.pool_exhausted);
        }
        if outcome.covered > 0 {
            self.events.publish(VaultEvent::ShieldPaid {
                account_id: account_id.clone(),
                correlation_id: correlation_id.clone(),
                shortfall: outcome.shortfall,
                covered: outcome.covered,
                pool_remaining: outcome.pool_remaining,
            });
        }
        if outcome.pool_exhausted {
            let owed = (outcome.shortfall as u128 * outcome.coverage_percent as u128 / 100) as u64;
            self.events.publish(VaultEvent::ShieldPoolDepleted {
                account_id: account_id.clone(),
                correlation_id,
                owed,
                paid: outcome.covered,
            });
        }
        Ok(outcome)
    }

    pub fn fund_shield(
        &self,
        account_id: &AccountId,
        gems: u64,
        correlation_id: Option<String>,
    ) -> Result<ShieldPolicy> {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.shield.fund(account_id, gems, &correlation_id)
    }

    pub fn shield_policy(&self, account_id: &AccountId) -> Result<ShieldPolicy> {
        self.shield.policy(account_id)
    }

    // ------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------

    /// Open a quota without a plan purchase
    pub fn open_moves(&self, advertiser_id: &AccountId, allotted: u64) -> Result<MovesQuota> {
        if !self.ledger.contains(advertiser_id) {
            return Err(VaultError::AccountNotFound(advertiser_id.clone()));
        }
        Ok(self.moves.open(advertiser_id, allotted))
    }

    pub fn purchase_moves(
        &self,
        advertiser_id: &AccountId,
        plan: AdvertiserPlan,
        correlation_id: Option<String>,
    ) -> Result<MovesQuota> {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.moves.purchase(advertiser_id, plan, &correlation_id)
    }

    pub fn consume_moves(&self, advertiser_id: &AccountId, amount: u64) -> Result<u64> {
        let remaining = self.moves.consume(advertiser_id, amount)?;
        if remaining == 0 {
            self.publish_moves_exhausted(advertiser_id);
        }
        Ok(remaining)
    }

    pub fn reset_moves(&self, advertiser_id: &AccountId) -> Result<MovesQuota> {
        self.moves.reset(advertiser_id)
    }

    pub fn moves_quota(&self, advertiser_id: &AccountId) -> Result<MovesQuota> {
        self.moves.quota(advertiser_id)
    }

    fn publish_moves_exhausted(&self, advertiser_id: &AccountId) {
        let allotted = self
            .moves
            .quota(advertiser_id)
            .map(|q| q.allotted)
            .unwrap_or_default();
        self.events.publish(VaultEvent::MovesExhausted {
            advertiser_id: advertiser_id.clone(),
            allotted,
        });
    }
}
