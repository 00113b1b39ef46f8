//! # Reward Calculation
//!
//! Computes the points/gems/keys payout for a user action. Calculation is
//! separate from crediting: a quote has no side effects, so the same call
//! backs reward previews and real grants.
//!
//! ## Base Values
//!
//! | Action | Points | Gems |
//! |--------|--------|------|
//! | like | 5 | 0 |
//! | comment | 10 | 0 |
//! | share | 10 | 0 |
//! | save | 5 | 0 |
//! | repost | 15 | 0 |
//! | follow | 10 | 0 |
//! | drop_completion | 50 | 5 |
//!
//! External (off-platform) actions use 10x the in-app base. The tier
//! multiplier is applied next and the result floored; keys are
//! `ceil(points / 20)`.

use crate::constants::{EXTERNAL_FACTOR, KEYS_DIVISOR};
use crate::tiers::TierTable;
use gemvault_core::{Multiplier, Result, Tier, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// User action that earns a reward
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ActionType {
    Like,
    Comment,
    Share,
    Save,
    Repost,
    Follow,
    /// Completing a sponsored drop
    DropCompletion,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        Self::Like,
        Self::Comment,
        Self::Share,
        Self::Save,
        Self::Repost,
        Self::Follow,
        Self::DropCompletion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Share => "share",
            Self::Save => "save",
            Self::Repost => "repost",
            Self::Follow => "follow",
            Self::DropCompletion => "drop_completion",
        }
    }

    /// In-app base reward
    pub fn default_base(&self) -> RewardBase {
        match self {
            Self::Like => RewardBase::points(5),
            Self::Comment => RewardBase::points(10),
            Self::Share => RewardBase::points(10),
            Self::Save => RewardBase::points(5),
            Self::Repost => RewardBase::points(15),
            Self::Follow => RewardBase::points(10),
            Self::DropCompletion => RewardBase { points: 50, gems: 5 },
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.name() == s.trim())
            .ok_or_else(|| VaultError::UnknownAction(s.to_string()))
    }
}

impl TryFrom<String> for ActionType {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Base payout of an action before any multiplier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBase {
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub gems: u64,
}

impl RewardBase {
    pub const fn points(points: u64) -> Self {
        Self { points, gems: 0 }
    }
}

/// Computed payout for one action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardQuote {
    pub action: ActionType,
    pub is_external: bool,
    pub tier: Tier,
    pub multiplier: Multiplier,
    pub points: u64,
    pub gems: u64,
    pub keys: u64,
}

impl RewardQuote {
    pub fn is_empty(&self) -> bool {
        self.points == 0 && self.gems == 0 && self.keys == 0
    }
}

/// Reward calculator
#[derive(Clone, Debug)]
pub struct RewardCalculator {
    /// Tier multipliers
    tiers: TierTable,

    /// In-app base reward per action
    bases: BTreeMap<ActionType, RewardBase>,

    /// Factor applied to external actions
    external_factor: u64,

    /// Points per key
    keys_divisor: u64,
}

impl Default for RewardCalculator {
    fn default() -> Self {
        Self::new(TierTable::default())
    }
}

impl RewardCalculator {
    /// Create a calculator with the default base table
    pub fn new(tiers: TierTable) -> Self {
        Self {
            tiers,
            bases: ActionType::ALL
                .into_iter()
                .map(|action| (action, action.default_base()))
                .collect(),
            external_factor: EXTERNAL_FACTOR,
            keys_divisor: KEYS_DIVISOR,
        }
    }

    /// Override base rewards for some actions
    pub fn with_bases(mut self, overrides: impl IntoIterator<Item = (ActionType, RewardBase)>) -> Self {
        self.bases.extend(overrides);
        self
    }

    pub fn with_external_factor(mut self, factor: u64) -> Self {
        self.external_factor = factor;
        self
    }

    /// Set points per key; zero keeps the current divisor
    pub fn with_keys_divisor(mut self, divisor: u64) -> Self {
        if divisor > 0 {
            self.keys_divisor = divisor;
        }
        self
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn bases(&self) -> impl Iterator<Item = (ActionType, RewardBase)> + '_ {
        self.bases.iter().map(|(a, b)| (*a, *b))
    }

    /// Base reward for an action, scaled for external proof
    pub fn base_for(&self, action: ActionType, is_external: bool) -> Result<RewardBase> {
        let base = self
            .bases
            .get(&action)
            .copied()
            .ok_or_else(|| VaultError::UnknownAction(action.name().to_string()))?;

        if !is_external {
            return Ok(base);
        }
        Ok(RewardBase {
            points: base.points.saturating_mul(self.external_factor),
            gems: base.gems.saturating_mul(self.external_factor),
        })
    }

    /// Compute the reward for an action
    pub fn compute(&self, action: ActionType, is_external: bool, tier: Tier) -> Result<RewardQuote> {
        let multiplier = self.tiers.multiplier(tier)?;
        let base = self.base_for(action, is_external)?;

        let points = multiplier.apply_floor(base.points);
        let gems = multiplier.apply_floor(base.gems);
        let keys = points.div_ceil(self.keys_divisor);

        Ok(RewardQuote {
            action,
            is_external,
            tier,
            multiplier,
            points,
            gems,
            keys,
        })
    }
}
