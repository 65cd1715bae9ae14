//! TOML configuration
//!
//! # Example Configuration
//!
//! ```toml
//! [auction]
//! default_duration_secs = 120
//!
//! [settlement]
//! risk_pool_account = "pool-main"
//! breach_pool_share = 0.6
//!
//! [tiers.express]
//! label = "Rush"
//! window_hours = 12
//! bond_pct = 0.5
//! protection_fee_pct = 0.1
//! early_bonus_pct = 0.25
//! price_multiplier = 2.0
//! ```

pub mod types;

#[cfg(test)]
mod tests;

pub use types::{
    AuctionConfig, PerformanceBondConfig, PricingConfig, RetryConfig, SettlementConfig, SlashRates,
    SpeedBand, StorageConfig, ValueBand,
};

use crate::sla::TierTable;
use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "clearhouse.toml";

/// Root configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub auction: AuctionConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub tiers: TierTable,
    #[serde(default)]
    pub performance_bond: PerformanceBondConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub notifier: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error occurred while reading/writing config file
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error
    #[error("TOML parse error in {path:?}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// A value failed validation
    #[error("invalid configuration value {field}: {reason}")]
    Invalid { field: String, reason: String },
    /// No home or data directory to fall back on
    #[error("could not determine {0} directory")]
    NoDirectory(&'static str),
}

impl MarketConfig {
    /// Load, apply environment overrides, and validate
    ///
    /// Search order:
    /// 1. `explicit` path, which must exist
    /// 2. `./clearhouse.toml`
    /// 3. `~/.config/clearhouse/clearhouse.toml`
    /// 4. built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                let user = Self::user_config_path().ok();
                if local.exists() {
                    Self::from_file(local)?
                } else if let Some(user) = user.filter(|p| p.exists()) {
                    Self::from_file(&user)?
                } else {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MarketConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = ?path, "loaded configuration");
        Ok(config)
    }

    /// Write pretty TOML, creating parent directories as needed
    pub fn save(&self, path: Option<&Path>) -> Result<(), ConfigError> {
        let target_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::user_config_path()?,
        };

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(&target_path, toml_string).map_err(|source| ConfigError::Io {
            path: target_path.clone(),
            source,
        })?;

        Ok(())
    }

    fn user_config_path() -> Result<PathBuf, ConfigError> {
        let home_dir = dirs::home_dir().ok_or(ConfigError::NoDirectory("home"))?;
        Ok(home_dir.join(".config").join("clearhouse").join(CONFIG_FILE_NAME))
    }

    /// Directory for persisted collections
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .ok_or(ConfigError::NoDirectory("data"))?
                .join("clearhouse")),
        }
    }

    /// Apply environment variable overrides
    ///
    /// - `CLEARHOUSE_DATA_DIR` → `storage.data_dir`
    /// - `CLEARHOUSE_AUCTION_SECS` → `auction.default_duration_secs`
    /// - `CLEARHOUSE_RISK_POOL` → `settlement.risk_pool_account`
    ///
    /// Invalid values are logged as warnings but don't cause errors.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("CLEARHOUSE_DATA_DIR").filter(|v| !v.is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(secs) = lookup("CLEARHOUSE_AUCTION_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => self.auction.default_duration_secs = secs,
                Err(_) => warn!(value = %secs, "ignoring invalid CLEARHOUSE_AUCTION_SECS"),
            }
        }

        if let Some(pool) = lookup("CLEARHOUSE_RISK_POOL").filter(|v| !v.is_empty()) {
            self.settlement.risk_pool_account = AccountId::new(pool);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let auction = &self.auction;
        if auction.default_duration_secs == 0 {
            return Err(invalid("auction.default_duration_secs", "must be positive"));
        }
        if auction.price_weight < 0.0 || auction.speed_weight < 0.0 {
            return Err(invalid("auction.price_weight", "weights must be non-negative"));
        }
        if (auction.price_weight + auction.speed_weight - 1.0).abs() > 1e-9 {
            return Err(invalid("auction.price_weight", "price and speed weights must sum to 1"));
        }

        let settlement = &self.settlement;
        if settlement.risk_pool_account.as_str().is_empty() {
            return Err(invalid("settlement.risk_pool_account", "must not be empty"));
        }
        if !settlement.breach_pool_share.is_share() {
            return Err(invalid("settlement.breach_pool_share", "must be within [0, 1]"));
        }
        if !settlement.early_bonus_max_elapsed.is_share() {
            return Err(invalid("settlement.early_bonus_max_elapsed", "must be within [0, 1]"));
        }
        if settlement.breach_sweep_secs == 0 {
            return Err(invalid("settlement.breach_sweep_secs", "must be positive"));
        }

        for (tier, def) in self.tiers.iter() {
            let field = |name: &str| format!("tiers.{}.{}", tier, name);
            if def.window_hours == 0 {
                return Err(invalid(&field("window_hours"), "must be positive"));
            }
            if def.price_multiplier.bps() == 0 {
                return Err(invalid(&field("price_multiplier"), "must be positive"));
            }
            for (name, rate) in [
                ("bond_pct", def.bond_pct),
                ("protection_fee_pct", def.protection_fee_pct),
                ("early_bonus_pct", def.early_bonus_pct),
            ] {
                if !rate.is_share() {
                    return Err(invalid(&field(name), "must be within [0, 1]"));
                }
            }
        }

        self.validate_performance_bond()?;

        if !(0.0..=1.0).contains(&self.pricing.default_epsilon) {
            return Err(invalid("pricing.default_epsilon", "must be within [0, 1]"));
        }
        if self.notifier.exponential_base < 1.0 || self.auction.clearing_retry.exponential_base < 1.0 {
            return Err(invalid("exponential_base", "must be at least 1.0"));
        }

        Ok(())
    }

    fn validate_performance_bond(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::Invalid {
            field: format!("performance_bond.{}", field),
            reason,
        };
        let policy = &self.performance_bond;

        if policy.value_bands.is_empty() {
            return Err(invalid("value_bands", "at least one band is required".to_string()));
        }
        let last = policy.value_bands.len() - 1;
        let mut previous = None;
        for (i, band) in policy.value_bands.iter().enumerate() {
            if band.bond.is_negative() {
                return Err(invalid("value_bands", format!("band '{}' has a negative bond", band.name)));
            }
            match band.max_order_value {
                None if i != last => {
                    return Err(invalid(
                        "value_bands",
                        format!("only the last band may be open-ended, '{}' is not last", band.name),
                    ));
                }
                Some(max) => {
                    if previous.is_some_and(|prev| max <= prev) {
                        return Err(invalid(
                            "value_bands",
                            format!("band '{}' must have a larger bound than the one before it", band.name),
                        ));
                    }
                    previous = Some(max);
                }
                None => {}
            }
        }

        let mut previous = None;
        for band in &policy.speed_bands {
            if !band.max_elapsed.is_share() || band.bonus.is_negative() {
                return Err(invalid("speed_bands", format!("band '{}' is out of range", band.name)));
            }
            if previous.is_some_and(|prev| band.max_elapsed <= prev) {
                return Err(invalid(
                    "speed_bands",
                    format!("band '{}' must have a larger bound than the one before it", band.name),
                ));
            }
            previous = Some(band.max_elapsed);
        }

        let slash = &policy.slash;
        if ![slash.minor, slash.moderate, slash.major].iter().all(|r| r.is_share()) {
            return Err(invalid("slash", "slash rates must be within [0, 1]".to_string()));
        }

        Ok(())
    }
}
