//! Error types for Gemvault ledger and rule-engine operations

use crate::types::{AccountId, Currency};
use thiserror::Error;

/// Result type alias for Gemvault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur in Gemvault operations
///
/// Every variant is a caller-recoverable condition except
/// [`VaultError::LedgerInconsistent`], which means the append-only log and the
/// balance snapshot disagree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    // === Ledger ===
    /// Debit larger than the available balance
    #[error("Insufficient {currency} balance: have {available}, need {requested}")]
    InsufficientBalance {
        currency: Currency,
        available: u64,
        requested: u64,
    },

    /// Account has not been opened
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account was already opened
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    /// Amount is zero or does not fit a signed ledger delta
    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    /// Correlation id reused for a different request
    #[error("Correlation id {correlation_id} already used for a different {scope}")]
    IdempotencyConflict {
        /// What the key was first used for, e.g. `gems posting`
        scope: String,
        correlation_id: String,
    },

    /// Replaying the entries does not reproduce the balance
    #[error("Ledger inconsistent for {account} {currency}: snapshot {snapshot}, replayed {replayed}")]
    LedgerInconsistent {
        account: AccountId,
        currency: Currency,
        snapshot: u64,
        replayed: i128,
    },

    /// Balance would exceed the representable range
    #[error("Balance overflow for {0}")]
    Overflow(Currency),

    /// Currency name not recognised
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    // === Tiers & rewards ===
    /// Tier name not recognised or absent from the multiplier table
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    /// Action type not recognised
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    // === Staking ===
    /// Lock period outside the supported set
    #[error("Invalid lock period: {0} days (expected 30, 60 or 90)")]
    InvalidLockPeriod(u32),

    /// Withdrawal attempted before the maturity date
    #[error("Stake {position_id} not matured until {matures_at}")]
    NotMatured {
        position_id: String,
        matures_at: String,
    },

    /// Position already released its payout
    #[error("Stake {0} already withdrawn")]
    AlreadyWithdrawn(String),

    /// Position id not known
    #[error("Stake position not found: {0}")]
    PositionNotFound(String),

    // === Shield ===
    /// Coverage outside (0, 100]
    #[error("Invalid coverage percent: {0}")]
    InvalidCoverage(u8),

    // === Moves ===
    /// Request would push consumption past the allotment
    #[error("Moves quota exhausted for {advertiser}: {remaining} remaining, {requested} requested")]
    QuotaExhausted {
        advertiser: AccountId,
        remaining: u64,
        requested: u64,
    },

    /// Advertiser has no quota
    #[error("Moves quota not found for {0}")]
    QuotaNotFound(AccountId),

    /// Advertiser plan not recognised
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    // === Redemption ===
    /// Assignment was already redeemed
    #[error("Reward {0} already redeemed")]
    AlreadyRedeemed(String),

    /// Assignment passed its expiry
    #[error("Reward {0} expired")]
    Expired(String),

    /// Reward supply ran out
    #[error("Reward {0} depleted")]
    Depleted(String),

    /// Assignment id not known
    #[error("Reward assignment not found: {0}")]
    AssignmentNotFound(String),
}

impl VaultError {
    /// Stable numeric code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::InsufficientBalance { .. } => 1001,
            Self::AccountNotFound(_) => 1002,
            Self::AccountExists(_) => 1003,
            Self::InvalidAmount(_) => 1004,
            Self::IdempotencyConflict { .. } => 1005,
            Self::LedgerInconsistent { .. } => 1006,
            Self::Overflow(_) => 1007,
            Self::UnknownCurrency(_) => 1008,
            Self::UnknownTier(_) => 2001,
            Self::UnknownAction(_) => 2002,
            Self::InvalidLockPeriod(_) => 3001,
            Self::NotMatured { .. } => 3002,
            Self::AlreadyWithdrawn(_) => 3003,
            Self::PositionNotFound(_) => 3004,
            Self::InvalidCoverage(_) => 4001,
            Self::QuotaExhausted { .. } => 5001,
            Self::QuotaNotFound(_) => 5002,
            Self::UnknownPlan(_) => 5003,
            Self::AlreadyRedeemed(_) => 6001,
            Self::Expired(_) => 6002,
            Self::Depleted(_) => 6003,
            Self::AssignmentNotFound(_) => 6004,
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountExists(_) => "account_exists",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::IdempotencyConflict { .. } => "idempotency_conflict",
            Self::LedgerInconsistent { .. } => "ledger_inconsistent",
            Self::Overflow(_) => "overflow",
            Self::UnknownCurrency(_) => "unknown_currency",
            Self::UnknownTier(_) => "unknown_tier",
            Self::UnknownAction(_) => "unknown_action",
            Self::InvalidLockPeriod(_) => "invalid_lock_period",
            Self::NotMatured { .. } => "not_matured",
            Self::AlreadyWithdrawn(_) => "already_withdrawn",
            Self::PositionNotFound(_) => "position_not_found",
            Self::InvalidCoverage(_) => "invalid_coverage",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::QuotaNotFound(_) => "quota_not_found",
            Self::UnknownPlan(_) => "unknown_plan",
            Self::AlreadyRedeemed(_) => "already_redeemed",
            Self::Expired(_) => "expired",
            Self::Depleted(_) => "depleted",
            Self::AssignmentNotFound(_) => "assignment_not_found",
        }
    }

    /// Check if the caller can act on the error (retry, message, no-op)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LedgerInconsistent { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = VaultError::InsufficientBalance {
            currency: Currency::Gems,
            available: 5,
            requested: 10,
        };
        assert_eq!(err.code(), 1001);
        assert_eq!(err.kind(), "insufficient_balance");

        let err = VaultError::QuotaExhausted {
            advertiser: AccountId::new("adv"),
            remaining: 0,
            requested: 1,
        };
        assert_eq!(err.code(), 5001);
    }

    #[test]
    fn test_error_display() {
        let err = VaultError::InsufficientBalance {
            currency: Currency::Gems,
            available: 5,
            requested: 10,
        };

        let msg = format!("{}", err);
        assert!(msg.contains("Insufficient gems balance"));
        assert!(msg.contains("have 5, need 10"));
    }

    #[test]
    fn test_idempotency_conflict_names_scope() {
        let err = VaultError::IdempotencyConflict {
            scope: "stake".into(),
            correlation_id: "k".into(),
        };
        assert_eq!(err.code(), 1005);
        assert_eq!(
            err.to_string(),
            "Correlation id k already used for a different stake"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(VaultError::InvalidLockPeriod(45).is_recoverable());
        assert!(VaultError::Expired("r".into()).is_recoverable());
        assert!(!VaultError::LedgerInconsistent {
            account: AccountId::new("a"),
            currency: Currency::Points,
            snapshot: 1,
            replayed: 0,
        }
        .is_recoverable());
    }
}
