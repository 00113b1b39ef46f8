//! # Gemvault Economics - Reward & Protection Rules
//!
//! The rule engines that turn user actions, tier membership, staking
//! commitments and advertiser quotas into ledger postings.
//!
//! ## Engines
//!
//! | Engine | Input | Ledger effect |
//! |--------|-------|---------------|
//! | [`RewardCalculator`] | action, external flag, tier | none (quote only) |
//! | [`StakeManager`] | gems, lock period | escrow debit, release credit |
//! | [`ShieldEngine`] | expected vs verified payout | shortfall credit from the pool |
//! | [`MovesTracker`] | advertiser campaign actions | plan purchase debit |
//! | [`RedemptionDesk`] | earned rewards | gem credit for `credit` rewards |
//!
//! ## Default Tables
//!
//! | Tier | Multiplier | Shield coverage |
//! |------|------------|-----------------|
//! | free | 1.0x | 50% |
//! | premium | 1.5x | 75% |
//! | super | 2.0x | 100% |
//!
//! | Lock | Stake multiplier | Coverage bonus |
//! |------|------------------|----------------|
//! | 30 days | 1.2x | +5% |
//! | 60 days | 1.5x | +10% |
//! | 90 days | 2.0x | +15% |

pub mod moves;
pub mod redemption;
pub mod rewards;
pub mod shield;
pub mod staking;
pub mod tiers;

// Re-exports
pub use moves::{AdvertiserPlan, MovesQuota, MovesTracker, PlanTerms};
pub use redemption::{RedemptionDesk, RewardAssignment, RewardStatus, RewardType};
pub use rewards::{ActionType, RewardBase, RewardCalculator, RewardQuote};
pub use shield::{CoverageTable, ShieldEngine, ShieldOutcome, ShieldPolicy};
pub use staking::{LockPeriod, StakeManager, StakePosition, StakeStatus};
pub use tiers::TierTable;

/// Product constants, used as configuration defaults
pub mod constants {
    /// Points per key earned (`keys = ceil(points / KEYS_DIVISOR)`)
    pub const KEYS_DIVISOR: u64 = 20;

    /// Base value factor for actions proven off-platform
    pub const EXTERNAL_FACTOR: u64 = 10;

    /// Length of an advertiser quota period
    pub const MOVES_PERIOD_DAYS: i64 = 30;

    /// Default lifetime of an earned reward
    pub const REWARD_TTL_DAYS: i64 = 30;

    /// Maximum shield coverage
    pub const MAX_COVERAGE_PERCENT: u8 = 100;
}

pub use constants::*;
