//! # Tier Multiplier Table
//!
//! Membership tier → reward multiplier. Lookups never fall back to a default
//! tier: a tier missing from the table is reported as `UnknownTier`.

use gemvault_core::{Multiplier, Result, Tier, VaultError};
use std::collections::BTreeMap;

/// Multiplier applied to base rewards per membership tier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierTable {
    multipliers: BTreeMap<Tier, Multiplier>,
}

impl Default for TierTable {
    fn default() -> Self {
        let multipliers = BTreeMap::from([
            (Tier::Free, Multiplier::from_bps(10_000)),
            (Tier::Premium, Multiplier::from_bps(15_000)),
            (Tier::Super, Multiplier::from_bps(20_000)),
        ]);
        Self { multipliers }
    }
}

impl TierTable {
    /// Create the default table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from explicit entries; tiers left out stay unknown
    pub fn from_entries(entries: impl IntoIterator<Item = (Tier, Multiplier)>) -> Self {
        Self {
            multipliers: entries.into_iter().collect(),
        }
    }

    /// Get the multiplier for a tier
    pub fn multiplier(&self, tier: Tier) -> Result<Multiplier> {
        self.multipliers
            .get(&tier)
            .copied()
            .ok_or_else(|| VaultError::UnknownTier(tier.name().to_string()))
    }

    /// Parse a tier name and look it up
    pub fn multiplier_for(&self, tier: &str) -> Result<Multiplier> {
        let tier: Tier = tier.parse()?;
        self.multiplier(tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, Multiplier)> + '_ {
        self.multipliers.iter().map(|(t, m)| (*t, *m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_multipliers() {
        let table = TierTable::new();
        assert_eq!(table.multiplier(Tier::Free).unwrap().as_factor(), 1.0);
        assert_eq!(table.multiplier(Tier::Premium).unwrap().as_factor(), 1.5);
        assert_eq!(table.multiplier(Tier::Super).unwrap().as_factor(), 2.0);
    }

    #[test]
    fn test_unknown_tier_name_rejected() {
        let table = TierTable::new();
        assert_eq!(
            table.multiplier_for("vip"),
            Err(VaultError::UnknownTier("vip".to_string()))
        );
    }

    #[test]
    fn test_missing_tier_does_not_default() {
        let table = TierTable::from_entries([(Tier::Free, Multiplier::ONE)]);
        assert!(table.multiplier(Tier::Free).is_ok());
        assert_eq!(
            table.multiplier(Tier::Super),
            Err(VaultError::UnknownTier("super".to_string()))
        );
    }
}
