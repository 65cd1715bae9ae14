use super::*;
use crate::money::{Amount, Currency, Rate};
use crate::sla::{SlaTier, TierDefinition};
use std::collections::HashMap;

#[test]
fn test_default_config() {
    let config = MarketConfig::default();
    assert_eq!(config.auction.default_duration_secs, 90);
    assert_eq!(config.auction.price_weight, 0.7);
    assert_eq!(config.settlement.escrow_currency, Currency::Usd);
    assert_eq!(config.settlement.bond_currency, Currency::Credits);
    assert_eq!(config.settlement.risk_pool_account.as_str(), "risk_pool");
    assert_eq!(config.settlement.breach_pool_share, Rate::percent(70));
    assert_eq!(config.settlement.default_tier, SlaTier::Standard);
    assert_eq!(config.pricing.default_epsilon, 0.15);
    assert_eq!(config.notifier.max_retries, 3);
    assert_eq!(config.performance_bond.value_bands.len(), 5);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config: MarketConfig = toml::from_str(
        r#"
        [settlement]
        breach_pool_share = 0.6

        [tiers.premium]
        label = "Premium+"
        window_hours = 48
        bond_pct = 0.3
        protection_fee_pct = 0.05
        early_bonus_pct = 0.15
        price_multiplier = 1.4
        "#,
    )
    .unwrap();

    assert_eq!(config.settlement.breach_pool_share, Rate::percent(60));
    assert_eq!(config.settlement.risk_pool_account.as_str(), "risk_pool");
    assert_eq!(config.tiers.premium.window_hours, 48);
    assert_eq!(config.tiers.express, TierDefinition::express());
    assert_eq!(config.auction.default_duration_secs, 90);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("clearhouse.toml");

    let mut config = MarketConfig::default();
    config.auction.default_duration_secs = 45;
    config.settlement.default_tier = SlaTier::Express;
    config.storage.data_dir = Some(dir.path().join("data"));
    config.save(Some(&path)).unwrap();

    let loaded = MarketConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_explicit_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = MarketConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clearhouse.toml");
    std::fs::write(&path, "[auction\nprice_weight = ").unwrap();

    let err = MarketConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse { .. }));
}

#[test]
fn test_env_overrides() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("CLEARHOUSE_DATA_DIR", "/var/lib/clearhouse"),
        ("CLEARHOUSE_AUCTION_SECS", "30"),
        ("CLEARHOUSE_RISK_POOL", "pool-eu"),
    ]);
    let mut config = MarketConfig::default();
    config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(config.storage.data_dir, Some(PathBuf::from("/var/lib/clearhouse")));
    assert_eq!(config.auction.default_duration_secs, 30);
    assert_eq!(config.settlement.risk_pool_account.as_str(), "pool-eu");
}

#[test]
fn test_invalid_env_override_is_ignored() {
    let mut config = MarketConfig::default();
    config.apply_overrides_from(|key| {
        (key == "CLEARHOUSE_AUCTION_SECS").then(|| "soon".to_string())
    });
    assert_eq!(config.auction.default_duration_secs, 90);
}

#[test]
fn test_validate_weights_must_sum_to_one() {
    let mut config = MarketConfig::default();
    config.auction.speed_weight = 0.5;
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "auction.price_weight"));
}

#[test]
fn test_validate_rejects_share_above_one() {
    let mut config = MarketConfig::default();
    config.settlement.breach_pool_share = Rate::percent(120);
    assert!(config.validate().is_err());

    let mut config = MarketConfig::default();
    config.tiers.economy.bond_pct = Rate::percent(150);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("tiers.economy.bond_pct"));
}

#[test]
fn test_validate_band_ordering() {
    let mut config = MarketConfig::default();
    config.performance_bond.value_bands[2].max_order_value = Some(Amount::from_major(100));
    assert!(config.validate().is_err());

    let mut config = MarketConfig::default();
    config.performance_bond.value_bands[0].max_order_value = None;
    assert!(config.validate().is_err());

    let mut config = MarketConfig::default();
    config.performance_bond.speed_bands.reverse();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_epsilon_range() {
    let mut config = MarketConfig::default();
    config.pricing.default_epsilon = 1.5;
    assert!(config.validate().is_err());
}
