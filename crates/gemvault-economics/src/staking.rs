//! # Staking System
//!
//! Time-locked gem commitments that mature into a larger balance.
//!
//! ## Lock Periods
//!
//! | Lock | Multiplier | Payout for 1,000 gems |
//! |------|------------|------------------------|
//! | 30 days | 1.2x | 1,200 |
//! | 60 days | 1.5x | 1,500 |
//! | 90 days | 2.0x | 2,000 |
//!
//! Gems are debited into escrow when the stake is created. A position pays
//! out exactly once: the status check under the account lock rejects any
//! second withdrawal, however the call is retried. Positions are never
//! removed; a withdrawn position stays as an audit record.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use gemvault_core::{AccountId, Currency, Ledger, Multiplier, ReasonCode, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Supported lock durations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum LockPeriod {
    Days30,
    Days60,
    Days90,
}

impl LockPeriod {
    pub const ALL: [LockPeriod; 3] = [Self::Days30, Self::Days60, Self::Days90];

    pub fn days(&self) -> u32 {
        match self {
            Self::Days30 => 30,
            Self::Days60 => 60,
            Self::Days90 => 90,
        }
    }

    /// Maturity multiplier
    pub fn multiplier(&self) -> Multiplier {
        match self {
            Self::Days30 => Multiplier::from_bps(12_000),
            Self::Days60 => Multiplier::from_bps(15_000),
            Self::Days90 => Multiplier::from_bps(20_000),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.days() as i64)
    }
}

impl TryFrom<u32> for LockPeriod {
    type Error = VaultError;

    fn try_from(days: u32) -> Result<Self> {
        match days {
            30 => Ok(Self::Days30),
            60 => Ok(Self::Days60),
            90 => Ok(Self::Days90),
            other => Err(VaultError::InvalidLockPeriod(other)),
        }
    }
}

impl From<LockPeriod> for u32 {
    fn from(lock: LockPeriod) -> Self {
        lock.days()
    }
}

/// Lifecycle of a stake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    /// Locked, not yet due
    Active,
    /// Due and awaiting withdrawal
    Matured,
    /// Payout released
    Withdrawn,
}

/// Stake position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub position_id: Uuid,
    pub account_id: AccountId,
    pub principal_gems: u64,
    pub lock_days: LockPeriod,
    pub multiplier: Multiplier,
    pub started_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub status: StakeStatus,
    /// Gems released at withdrawal
    pub payout_gems: Option<u64>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl StakePosition {
    fn new(account_id: AccountId, principal_gems: u64, lock: LockPeriod, now: DateTime<Utc>) -> Self {
        Self {
            position_id: Uuid::new_v4(),
            account_id,
            principal_gems,
            lock_days: lock,
            multiplier: lock.multiplier(),
            started_at: now,
            matures_at: now + lock.duration(),
            status: StakeStatus::Active,
            payout_gems: None,
            withdrawn_at: None,
        }
    }

    /// Check if the lock has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.matures_at
    }

    /// `floor(principal × multiplier)`
    pub fn maturity_payout(&self) -> u64 {
        self.multiplier.apply_floor(self.principal_gems)
    }
}

/// Stake manager
pub struct StakeManager {
    ledger: Arc<Ledger>,

    /// All positions ever created
    positions: DashMap<Uuid, StakePosition>,

    /// Creation idempotency keys
    by_correlation: DashMap<(AccountId, String), Uuid>,
}

impl StakeManager {
    /// Create new stake manager
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            positions: DashMap::new(),
            by_correlation: DashMap::new(),
        }
    }

    /// Escrow `gems` for `lock_days` days
    pub fn stake(
        &self,
        account_id: &AccountId,
        gems: u64,
        lock_days: u32,
        correlation_id: &str,
    ) -> Result<StakePosition> {
        let lock = LockPeriod::try_from(lock_days)?;
        let key = (account_id.clone(), correlation_id.to_string());

        self.ledger.transact(account_id, |book| {
            let existing = self.by_correlation.get(&key).map(|id| *id.value());
            if let Some(position_id) = existing {
                let position = self.position(&position_id)?;
                if position.principal_gems != gems || position.lock_days != lock {
                    return Err(VaultError::IdempotencyConflict {
                        scope: "stake".to_string(),
                        correlation_id: correlation_id.to_string(),
                    });
                }
                return Ok(position);
            }

            book.debit(Currency::Gems, gems, ReasonCode::StakeEscrow, correlation_id)?;

            let position = StakePosition::new(account_id.clone(), gems, lock, book.now());
            self.positions.insert(position.position_id, position.clone());
            self.by_correlation.insert(key.clone(), position.position_id);

            tracing::info!(
                account = %account_id,
                position = %position.position_id,
                gems,
                lock_days,
                matures_at = %position.matures_at,
                "Stake created"
            );
            Ok(position)
        })
    }

    /// Release a matured position's payout
    pub fn withdraw(&self, position_id: &Uuid) -> Result<StakePosition> {
        let account_id = self
            .positions
            .get(position_id)
            .map(|p| p.account_id.clone())
            .ok_or_else(|| VaultError::PositionNotFound(position_id.to_string()))?;

        self.ledger.transact(&account_id, |book| {
            let now = book.now();
            let position = self.position(position_id)?;

            if position.status == StakeStatus::Withdrawn {
                return Err(VaultError::AlreadyWithdrawn(position_id.to_string()));
            }
            if !position.is_due(now) {
                return Err(VaultError::NotMatured {
                    position_id: position_id.to_string(),
                    matures_at: position.matures_at.to_rfc3339(),
                });
            }

            let payout = position.maturity_payout();
            book.credit(
                Currency::Gems,
                payout,
                ReasonCode::StakeRelease,
                &format!("stake-release:{position_id}"),
            )?;

            let mut entry = self
                .positions
                .get_mut(position_id)
                .ok_or_else(|| VaultError::PositionNotFound(position_id.to_string()))?;
            entry.status = StakeStatus::Withdrawn;
            entry.payout_gems = Some(payout);
            entry.withdrawn_at = Some(now);

            tracing::info!(
                account = %account_id,
                position = %position_id,
                principal = entry.principal_gems,
                payout,
                "Stake withdrawn"
            );
            Ok(entry.clone())
        })
    }

    /// Flag every due active position as matured
    pub fn mark_matured(&self) -> Vec<StakePosition> {
        let now = self.ledger.now();
        let mut matured = Vec::new();
        for mut position in self.positions.iter_mut() {
            if position.status == StakeStatus::Active && position.is_due(now) {
                position.status = StakeStatus::Matured;
                matured.push(position.clone());
            }
        }
        if !matured.is_empty() {
            tracing::debug!(count = matured.len(), "Stakes matured");
        }
        matured
    }

    pub fn position(&self, position_id: &Uuid) -> Result<StakePosition> {
        self.positions
            .get(position_id)
            .map(|p| p.clone())
            .ok_or_else(|| VaultError::PositionNotFound(position_id.to_string()))
    }

    /// All positions for an account, oldest first
    pub fn positions_for(&self, account_id: &AccountId) -> Vec<StakePosition> {
        let mut positions: Vec<_> = self
            .positions
            .iter()
            .filter(|p| &p.account_id == account_id)
            .map(|p| p.clone())
            .collect();
        positions.sort_by_key(|p| p.started_at);
        positions
    }

    /// Lock periods of positions not yet withdrawn
    pub fn open_locks(&self, account_id: &AccountId) -> Vec<LockPeriod> {
        self.positions_for(account_id)
            .into_iter()
            .filter(|p| p.status != StakeStatus::Withdrawn)
            .map(|p| p.lock_days)
            .collect()
    }

    /// Position created under a correlation id, if any
    pub fn find_by_correlation(&self, account_id: &AccountId, correlation_id: &str) -> Option<Uuid> {
        self.by_correlation
            .get(&(account_id.clone(), correlation_id.to_string()))
            .map(|id| *id.value())
    }

    /// Gems currently held in escrow for an account
    pub fn escrowed(&self, account_id: &AccountId) -> u64 {
        self.positions_for(account_id)
            .iter()
            .filter(|p| p.status != StakeStatus::Withdrawn)
            .map(|p| p.principal_gems)
            .sum()
    }
}
