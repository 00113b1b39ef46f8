//! Service configuration types

use gemvault_core::{Multiplier, Tier};
use gemvault_economics::{
    ActionType, AdvertiserPlan, CoverageTable, LockPeriod, PlanTerms, RewardBase, RewardCalculator,
    TierTable, EXTERNAL_FACTOR, KEYS_DIVISOR, MOVES_PERIOD_DAYS, REWARD_TTL_DAYS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable prefix, e.g. `GEMVAULT__LOGGING__LEVEL=debug`
pub const ENV_PREFIX: &str = "GEMVAULT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Complete service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reward multiplier per tier
    #[serde(default)]
    pub tiers: TierSettings,

    /// Reward calculation
    #[serde(default)]
    pub rewards: RewardSettings,

    /// Social Shield coverage
    #[serde(default)]
    pub shield: ShieldSettings,

    /// Advertiser plans
    #[serde(default)]
    pub moves: MovesSettings,

    /// Reward lifetime and limited pools
    #[serde(default)]
    pub redemption: RedemptionSettings,

    /// Event bus
    #[serde(default)]
    pub events: EventSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ServiceConfig {
    /// Load defaults, then the optional TOML file, then `GEMVAULT__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tier_table()?;
        self.reward_calculator()?;
        self.coverage_table()?;

        if self.rewards.keys_divisor == 0 {
            return Err(ConfigError::Invalid("rewards.keys_divisor must be positive".into()));
        }
        if self.rewards.external_factor == 0 {
            return Err(ConfigError::Invalid("rewards.external_factor must be positive".into()));
        }
        if self.moves.period_days <= 0 {
            return Err(ConfigError::Invalid("moves.period_days must be positive".into()));
        }
        if self.redemption.default_ttl_days <= 0 {
            return Err(ConfigError::Invalid(
                "redemption.default_ttl_days must be positive".into(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("events.capacity must be positive".into()));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be text or json, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        let entries = [
            (Tier::Free, self.tiers.free),
            (Tier::Premium, self.tiers.premium),
            (Tier::Super, self.tiers.super_tier),
        ];
        let mut multipliers = Vec::with_capacity(entries.len());
        for (tier, factor) in entries {
            let multiplier = Multiplier::from_factor(factor).ok_or_else(|| {
                ConfigError::Invalid(format!("tiers.{tier} must be a positive factor, got {factor}"))
            })?;
            multipliers.push((tier, multiplier));
        }
        Ok(TierTable::from_entries(multipliers))
    }

    pub fn reward_calculator(&self) -> Result<RewardCalculator, ConfigError> {
        let mut bases = Vec::with_capacity(self.rewards.bases.len());
        for (name, base) in &self.rewards.bases {
            let action: ActionType = name
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("rewards.bases: unknown action {name}")))?;
            bases.push((action, *base));
        }
        Ok(RewardCalculator::new(self.tier_table()?)
            .with_bases(bases)
            .with_external_factor(self.rewards.external_factor)
            .with_keys_divisor(self.rewards.keys_divisor))
    }

    pub fn coverage_table(&self) -> Result<CoverageTable, ConfigError> {
        let shield = &self.shield;
        CoverageTable::new(
            [
                (Tier::Free, shield.free),
                (Tier::Premium, shield.premium),
                (Tier::Super, shield.super_tier),
            ],
            [
                (LockPeriod::Days30, shield.bonus_30d),
                (LockPeriod::Days60, shield.bonus_60d),
                (LockPeriod::Days90, shield.bonus_90d),
            ],
        )
        .map_err(|err| ConfigError::Invalid(format!("shield: {err}")))
    }

    pub fn plan_terms(&self) -> [(AdvertiserPlan, PlanTerms); 3] {
        [
            (AdvertiserPlan::Starter, self.moves.starter),
            (AdvertiserPlan::Growth, self.moves.growth),
            (AdvertiserPlan::Scale, self.moves.scale),
        ]
    }
}

/// Tier multipliers as decimal factors
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierSettings {
    #[serde(default = "default_free_multiplier")]
    pub free: f64,

    #[serde(default = "default_premium_multiplier")]
    pub premium: f64,

    #[serde(rename = "super", default = "default_super_multiplier")]
    pub super_tier: f64,
}

fn default_free_multiplier() -> f64 {
    1.0
}

fn default_premium_multiplier() -> f64 {
    1.5
}

fn default_super_multiplier() -> f64 {
    2.0
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            free: default_free_multiplier(),
            premium: default_premium_multiplier(),
            super_tier: default_super_multiplier(),
        }
    }
}

/// Reward calculation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardSettings {
    /// Factor for off-platform actions
    #[serde(default = "default_external_factor")]
    pub external_factor: u64,

    /// Points per key
    #[serde(default = "default_keys_divisor")]
    pub keys_divisor: u64,

    /// Base reward overrides keyed by action name
    #[serde(default)]
    pub bases: BTreeMap<String, RewardBase>,
}

fn default_external_factor() -> u64 {
    EXTERNAL_FACTOR
}

fn default_keys_divisor() -> u64 {
    KEYS_DIVISOR
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            external_factor: default_external_factor(),
            keys_divisor: default_keys_divisor(),
            bases: BTreeMap::new(),
        }
    }
}

/// Shield coverage percentages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShieldSettings {
    #[serde(default = "default_free_coverage")]
    pub free: u8,

    #[serde(default = "default_premium_coverage")]
    pub premium: u8,

    #[serde(rename = "super", default = "default_super_coverage")]
    pub super_tier: u8,

    /// Bonus per open 30-day stake
    #[serde(default = "default_bonus_30d")]
    pub bonus_30d: u8,

    #[serde(default = "default_bonus_60d")]
    pub bonus_60d: u8,

    #[serde(default = "default_bonus_90d")]
    pub bonus_90d: u8,
}

fn default_free_coverage() -> u8 {
    50
}

fn default_premium_coverage() -> u8 {
    75
}

fn default_super_coverage() -> u8 {
    100
}

fn default_bonus_30d() -> u8 {
    5
}

fn default_bonus_60d() -> u8 {
    10
}

fn default_bonus_90d() -> u8 {
    15
}

impl Default for ShieldSettings {
    fn default() -> Self {
        Self {
            free: default_free_coverage(),
            premium: default_premium_coverage(),
            super_tier: default_super_coverage(),
            bonus_30d: default_bonus_30d(),
            bonus_60d: default_bonus_60d(),
            bonus_90d: default_bonus_90d(),
        }
    }
}

/// Advertiser plan settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovesSettings {
    /// Quota period length in days
    #[serde(default = "default_period_days")]
    pub period_days: i64,

    #[serde(default = "default_starter")]
    pub starter: PlanTerms,

    #[serde(default = "default_growth")]
    pub growth: PlanTerms,

    #[serde(default = "default_scale")]
    pub scale: PlanTerms,
}

fn default_period_days() -> i64 {
    MOVES_PERIOD_DAYS
}

fn default_starter() -> PlanTerms {
    AdvertiserPlan::Starter.default_terms()
}

fn default_growth() -> PlanTerms {
    AdvertiserPlan::Growth.default_terms()
}

fn default_scale() -> PlanTerms {
    AdvertiserPlan::Scale.default_terms()
}

impl Default for MovesSettings {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
            starter: default_starter(),
            growth: default_growth(),
            scale: default_scale(),
        }
    }
}

/// Redemption settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedemptionSettings {
    /// Lifetime of an assigned reward
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: i64,

    /// Limited supply per reward source
    #[serde(default)]
    pub pools: BTreeMap<String, u64>,
}

fn default_ttl_days() -> i64 {
    REWARD_TTL_DAYS
}

impl Default for RedemptionSettings {
    fn default() -> Self {
        Self {
            default_ttl_days: default_ttl_days(),
            pools: BTreeMap::new(),
        }
    }
}

/// Event bus settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventSettings {
    /// Broadcast buffer; slow subscribers lag past this
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ServiceConfig::default();
        config.validate().unwrap();

        let calculator = config.reward_calculator().unwrap();
        let quote = calculator.compute(ActionType::Share, true, Tier::Premium).unwrap();
        assert_eq!(quote.points, 150);
        assert_eq!(config.coverage_table().unwrap(), CoverageTable::default());
        assert_eq!(config.tier_table().unwrap(), TierTable::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.tiers.premium = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServiceConfig::default();
        config.rewards.keys_divisor = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.shield.free = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.shield.super_tier = 101;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.rewards.bases.insert("poke".into(), RewardBase::points(1));
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ServiceConfig::default();
        config.redemption.pools.insert("launch".into(), 3);
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[tiers]"));
        assert!(rendered.contains("super = 2.0"));

        let parsed: ServiceConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.redemption.pools.get("launch"), Some(&3));
        assert_eq!(parsed.moves.growth, config.moves.growth);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: ServiceConfig = toml::from_str(
            r#"
            [tiers]
            premium = 1.75

            [rewards.bases.like]
            points = 8
            "#,
        )
        .unwrap();
        assert_eq!(parsed.tiers.free, 1.0);
        assert_eq!(parsed.rewards.keys_divisor, 20);

        let quote = parsed
            .reward_calculator()
            .unwrap()
            .compute(ActionType::Like, false, Tier::Premium)
            .unwrap();
        assert_eq!(quote.points, 14);
    }
}
