//! Core type definitions for Gemvault
//!
//! Identifiers, the four currencies, membership tiers, balance snapshots and
//! the fixed-point multiplier used by every rule engine.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AccountId - identifier of a consumer or advertiser account
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The four virtual currencies tracked per account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Points,
    Gems,
    Keys,
    Gold,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Self::Points, Self::Gems, Self::Keys, Self::Gold];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Gems => "gems",
            Self::Keys => "keys",
            Self::Gold => "gold",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Currency {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "points" => Ok(Self::Points),
            "gems" => Ok(Self::Gems),
            "keys" => Ok(Self::Keys),
            "gold" => Ok(Self::Gold),
            other => Err(VaultError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Membership tier controlling the reward multiplier
///
/// Deserializing an unrecognised tier name is an error; there is no fallback
/// tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Tier {
    Free,
    Premium,
    Super,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Self::Free, Self::Premium, Self::Super];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Super => "super",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "super" => Ok(Self::Super),
            _ => Err(VaultError::UnknownTier(s.to_string())),
        }
    }
}

impl TryFrom<String> for Tier {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Basis points per 1.0x
pub const BPS_SCALE: u64 = 10_000;

/// Fixed-point multiplier in basis points (10_000 = 1.0x)
///
/// Applying a multiplier always rounds toward zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const ONE: Self = Self(BPS_SCALE as u32);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    /// Convert a decimal factor (e.g. `1.5`) to basis points, rounding to
    /// the nearest basis point. Returns `None` for non-finite or non-positive
    /// factors.
    pub fn from_factor(factor: f64) -> Option<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return None;
        }
        let bps = (factor * BPS_SCALE as f64).round();
        if bps < 1.0 || bps > u32::MAX as f64 {
            return None;
        }
        Some(Self(bps as u32))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn as_factor(&self) -> f64 {
        self.0 as f64 / BPS_SCALE as f64
    }

    /// `floor(amount × self)`, saturating at `u64::MAX`
    pub fn apply_floor(&self, amount: u64) -> u64 {
        let scaled = amount as u128 * self.0 as u128 / BPS_SCALE as u128;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.as_factor())
    }
}

/// Balance snapshot for the four currencies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub points: u64,
    pub gems: u64,
    pub keys: u64,
    pub gold: u64,
}

impl Balances {
    pub fn get(&self, currency: Currency) -> u64 {
        match currency {
            Currency::Points => self.points,
            Currency::Gems => self.gems,
            Currency::Keys => self.keys,
            Currency::Gold => self.gold,
        }
    }

    pub fn get_mut(&mut self, currency: Currency) -> &mut u64 {
        match currency {
            Currency::Points => &mut self.points,
            Currency::Gems => &mut self.gems,
            Currency::Keys => &mut self.keys,
            Currency::Gold => &mut self.gold,
        }
    }
}

/// Why a ledger entry was posted
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReasonCode {
    /// Reward for a user action
    RewardGrant,
    /// Gems moved into a stake escrow
    StakeEscrow,
    /// Matured stake released with its multiplier
    StakeRelease,
    /// Shield shortfall top-up
    ShieldTopUp,
    /// Credit paid by redeeming a reward
    Redemption,
    /// Advertiser plan purchase
    MovesPurchase,
    /// Caller-supplied reason for a direct posting
    Manual(String),
}

impl ReasonCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RewardGrant => "reward_grant",
            Self::StakeEscrow => "stake_escrow",
            Self::StakeRelease => "stake_release",
            Self::ShieldTopUp => "shield_top_up",
            Self::Redemption => "redemption",
            Self::MovesPurchase => "moves_purchase",
            Self::Manual(reason) => reason,
        }
    }
}

impl From<String> for ReasonCode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "reward_grant" => Self::RewardGrant,
            "stake_escrow" => Self::StakeEscrow,
            "stake_release" => Self::StakeRelease,
            "shield_top_up" => Self::ShieldTopUp,
            "redemption" => Self::Redemption,
            "moves_purchase" => Self::MovesPurchase,
            _ => Self::Manual(s),
        }
    }
}

impl From<ReasonCode> for String {
    fn from(reason: ReasonCode) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
