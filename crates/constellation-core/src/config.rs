//! Protocol configuration.
//!
//! # Configuration Sources
//!
//! - Environment variables (prefixed with `CNST_`)
//! - Serialized configuration (JSON via serde)
//! - Programmatic defaults and the builder
//!
//! # Example
//!
//! ```rust,ignore
//! use constellation_core::config::ProtocolConfig;
//!
//! let config = ProtocolConfig::builder()
//!     .chain_id(17000)
//!     .lock_threshold(Amount::ether(1))
//!     .build()?;
//! ```

use crate::crypto::AdmissionVerifyingKey;
use crate::{Amount, ConstellationError, Result, Wad};
use serde::{Deserialize, Serialize};

const BPS: u128 = 10_000;

/// Complete protocol configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub admission: AdmissionConfig,
    pub collateral: CollateralConfig,
    pub oracle: OracleConfig,
    pub vaults: VaultConfig,
    pub rewards: RewardConfig,
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    pub fn builder() -> ProtocolConfigBuilder {
        ProtocolConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Recognized variables:
    /// - `CNST_CHAIN_ID`
    /// - `CNST_LOCK_THRESHOLD_WEI`, `CNST_BOND_AMOUNT_WEI`
    /// - `CNST_TRUSTED_SIGNER_HEX` - hex ed25519 verifying key of the admission server
    /// - `CNST_ADMIN_CHECK` - `true`/`false`
    /// - `CNST_MAX_SIGNATURE_AGE_SECS`, `CNST_MAX_FUTURE_SKEW_SECS`
    /// - `CNST_TARGET_RATIO_BPS`, `CNST_MINIMUM_RATIO_BPS`
    /// - `CNST_CLAIM_INTERVAL_SECS`
    /// - `CNST_ORACLE_MAX_AGE_SECS`
    /// - `CNST_ETH_RESERVE_BPS`, `CNST_RPL_RESERVE_BPS`, `CNST_MIN_COVERAGE_BPS`
    /// - `CNST_TREASURY_FEE_BPS`, `CNST_OPERATOR_FEE_BPS`
    /// - `CNST_LOG_LEVEL`, `CNST_LOG_JSON`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("CNST_CHAIN_ID") {
            config.admission.chain_id = parse_var("CNST_CHAIN_ID", &v)?;
        }
        if let Some(v) = lookup("CNST_LOCK_THRESHOLD_WEI") {
            config.admission.lock_threshold = Amount::new(parse_var("CNST_LOCK_THRESHOLD_WEI", &v)?);
        }
        if let Some(v) = lookup("CNST_BOND_AMOUNT_WEI") {
            config.admission.bond_amount = Amount::new(parse_var("CNST_BOND_AMOUNT_WEI", &v)?);
        }
        if let Some(v) = lookup("CNST_TRUSTED_SIGNER_HEX") {
            config.admission.trusted_signer_hex = Some(v);
        }
        if let Some(v) = lookup("CNST_ADMIN_CHECK") {
            config.admission.admin_check = parse_var("CNST_ADMIN_CHECK", &v)?;
        }
        if let Some(v) = lookup("CNST_MAX_SIGNATURE_AGE_SECS") {
            config.admission.max_signature_age_secs = parse_var("CNST_MAX_SIGNATURE_AGE_SECS", &v)?;
        }
        if let Some(v) = lookup("CNST_MAX_FUTURE_SKEW_SECS") {
            config.admission.max_future_skew_secs = parse_var("CNST_MAX_FUTURE_SKEW_SECS", &v)?;
        }
        if let Some(v) = lookup("CNST_TARGET_RATIO_BPS") {
            config.collateral.target_ratio = bps_to_wad("CNST_TARGET_RATIO_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_MINIMUM_RATIO_BPS") {
            config.collateral.minimum_ratio = bps_to_wad("CNST_MINIMUM_RATIO_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_CLAIM_INTERVAL_SECS") {
            config.collateral.claim_interval_secs = parse_var("CNST_CLAIM_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("CNST_ORACLE_MAX_AGE_SECS") {
            config.oracle.max_age_secs = parse_var("CNST_ORACLE_MAX_AGE_SECS", &v)?;
        }
        if let Some(v) = lookup("CNST_ETH_RESERVE_BPS") {
            config.vaults.eth_reserve_ratio = bps_to_wad("CNST_ETH_RESERVE_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_RPL_RESERVE_BPS") {
            config.vaults.rpl_reserve_ratio = bps_to_wad("CNST_RPL_RESERVE_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_MIN_COVERAGE_BPS") {
            config.vaults.minimum_coverage_ratio = bps_to_wad("CNST_MIN_COVERAGE_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_TREASURY_FEE_BPS") {
            config.rewards.treasury_fee = bps_to_wad("CNST_TREASURY_FEE_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_OPERATOR_FEE_BPS") {
            config.rewards.operator_fee = bps_to_wad("CNST_OPERATOR_FEE_BPS", &v)?;
        }
        if let Some(v) = lookup("CNST_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("CNST_LOG_JSON") {
            config.logging.json_output = parse_var("CNST_LOG_JSON", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let admission = &self.admission;
        if admission.lock_threshold.is_zero() {
            return Err(ConstellationError::ConfigError(
                "lock_threshold must be greater than 0".into(),
            ));
        }
        if admission.bond_amount.is_zero() {
            return Err(ConstellationError::ConfigError(
                "bond_amount must be greater than 0".into(),
            ));
        }
        if let Some(ref key) = admission.trusted_signer_hex {
            if key.len() != 64 {
                return Err(ConstellationError::ConfigError(
                    "trusted_signer_hex must be 64 hex characters (32 bytes)".into(),
                ));
            }
            AdmissionVerifyingKey::from_hex(key).map_err(|e| {
                ConstellationError::ConfigError(format!("trusted_signer_hex is not a valid key: {e}"))
            })?;
        }

        let collateral = &self.collateral;
        if collateral.target_ratio.is_zero() {
            return Err(ConstellationError::ConfigError(
                "target_ratio must be greater than 0".into(),
            ));
        }
        if collateral.minimum_ratio > collateral.target_ratio {
            return Err(ConstellationError::ConfigError(format!(
                "minimum_ratio {} exceeds target_ratio {}",
                collateral.minimum_ratio, collateral.target_ratio
            )));
        }

        if self.oracle.max_age_secs == 0 {
            return Err(ConstellationError::ConfigError(
                "oracle max_age_secs must be greater than 0".into(),
            ));
        }

        let vaults = &self.vaults;
        if vaults.eth_reserve_ratio > Wad::ONE || vaults.rpl_reserve_ratio > Wad::ONE {
            return Err(ConstellationError::ConfigError(
                "vault reserve ratios must not exceed 1.0".into(),
            ));
        }
        if vaults.minimum_coverage_ratio.is_zero() {
            return Err(ConstellationError::ConfigError(
                "minimum_coverage_ratio must be greater than 0".into(),
            ));
        }

        let fees = self
            .rewards
            .treasury_fee
            .raw()
            .saturating_add(self.rewards.operator_fee.raw());
        if fees > Wad::ONE.raw() {
            return Err(ConstellationError::ConfigError(
                "treasury_fee + operator_fee must not exceed 1.0".into(),
            ));
        }

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConstellationError::ConfigError(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// The configured admission-server key, if any.
    pub fn trusted_signer(&self) -> Result<Option<AdmissionVerifyingKey>> {
        self.admission
            .trusted_signer_hex
            .as_deref()
            .map(AdmissionVerifyingKey::from_hex)
            .transpose()
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConstellationError::ConfigError(format!("Invalid {name}: {e}")))
}

fn bps_to_wad(name: &str, value: &str) -> Result<Wad> {
    let bps: u128 = parse_var(name, value)?;
    Wad::from_ratio(bps, BPS)
}

/// Signed admission parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub chain_id: u64,

    /// Exact value a requester must lock per validator.
    pub lock_threshold: Amount,

    /// Principal matched from the distributor per validator.
    pub bond_amount: Amount,

    /// Hex-encoded ed25519 verifying key of the admission server.
    pub trusted_signer_hex: Option<String>,

    /// When false, any well-formed request passes signature validation.
    pub admin_check: bool,

    /// Maximum signature age in seconds; 0 disables the age check.
    pub max_signature_age_secs: u64,

    /// Tolerated clock skew for signatures dated in the future.
    pub max_future_skew_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            lock_threshold: Amount::ether(1),
            bond_amount: Amount::ether(8),
            trusted_signer_hex: None,
            admin_check: true,
            max_signature_age_secs: 86_400,
            max_future_skew_secs: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub target_ratio: Wad,
    pub minimum_ratio: Wad,
    /// Minimum seconds between reward claims before surplus may be unstaked.
    pub claim_interval_secs: u64,
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            target_ratio: Wad::from_percent(15),
            minimum_ratio: Wad::from_percent(10),
            claim_interval_secs: 86_400,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleConfig {
    pub max_age_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 86_400,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    pub eth_reserve_ratio: Wad,
    pub rpl_reserve_ratio: Wad,
    /// Collateral value required per unit of principal before deposits are capped.
    pub minimum_coverage_ratio: Wad,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            eth_reserve_ratio: Wad::from_percent(2),
            rpl_reserve_ratio: Wad::from_percent(2),
            minimum_coverage_ratio: Wad::from_percent(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardConfig {
    pub treasury_fee: Wad,
    pub operator_fee: Wad,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            treasury_fee: Wad::from_percent(5),
            operator_fee: Wad::from_percent(10),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Whether to include span context in logs.
    pub include_spans: bool,

    /// JSON output format.
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            include_spans: true,
            json_output: false,
        }
    }
}

#[derive(Default)]
pub struct ProtocolConfigBuilder {
    config: ProtocolConfig,
}

impl ProtocolConfigBuilder {
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.admission.chain_id = chain_id;
        self
    }

    pub fn lock_threshold(mut self, amount: Amount) -> Self {
        self.config.admission.lock_threshold = amount;
        self
    }

    pub fn bond_amount(mut self, amount: Amount) -> Self {
        self.config.admission.bond_amount = amount;
        self
    }

    pub fn trusted_signer_hex(mut self, key: impl Into<String>) -> Self {
        self.config.admission.trusted_signer_hex = Some(key.into());
        self
    }

    pub fn admin_check(mut self, enabled: bool) -> Self {
        self.config.admission.admin_check = enabled;
        self
    }

    pub fn max_signature_age_secs(mut self, secs: u64) -> Self {
        self.config.admission.max_signature_age_secs = secs;
        self
    }

    pub fn max_future_skew_secs(mut self, secs: u64) -> Self {
        self.config.admission.max_future_skew_secs = secs;
        self
    }

    pub fn collateral_ratios(mut self, target: Wad, minimum: Wad) -> Self {
        self.config.collateral.target_ratio = target;
        self.config.collateral.minimum_ratio = minimum;
        self
    }

    pub fn claim_interval_secs(mut self, secs: u64) -> Self {
        self.config.collateral.claim_interval_secs = secs;
        self
    }

    pub fn oracle_max_age_secs(mut self, secs: u64) -> Self {
        self.config.oracle.max_age_secs = secs;
        self
    }

    pub fn reserve_ratios(mut self, eth: Wad, rpl: Wad) -> Self {
        self.config.vaults.eth_reserve_ratio = eth;
        self.config.vaults.rpl_reserve_ratio = rpl;
        self
    }

    pub fn minimum_coverage_ratio(mut self, ratio: Wad) -> Self {
        self.config.vaults.minimum_coverage_ratio = ratio;
        self
    }

    pub fn fees(mut self, treasury: Wad, operator: Wad) -> Self {
        self.config.rewards.treasury_fee = treasury;
        self.config.rewards.operator_fee = operator;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.logging.json_output = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ProtocolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AdmissionSigningKey;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        assert!(ProtocolConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = ProtocolConfig::builder()
            .chain_id(17000)
            .lock_threshold(Amount::ether(2))
            .max_signature_age_secs(600)
            .log_level("debug")
            .build()
            .expect("should build");

        assert_eq!(config.admission.chain_id, 17000);
        assert_eq!(config.admission.lock_threshold, Amount::ether(2));
        assert_eq!(config.admission.max_signature_age_secs, 600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn minimum_ratio_above_target_rejected() {
        let result = ProtocolConfig::builder()
            .collateral_ratios(Wad::from_percent(10), Wad::from_percent(20))
            .build();
        assert!(matches!(result, Err(ConstellationError::ConfigError(_))));
    }

    #[test]
    fn fees_above_one_rejected() {
        let result = ProtocolConfig::builder()
            .fees(Wad::from_percent(70), Wad::from_percent(31))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_bond_rejected() {
        assert!(ProtocolConfig::builder().bond_amount(Amount::ZERO).build().is_err());
        assert!(ProtocolConfig::builder().lock_threshold(Amount::ZERO).build().is_err());
    }

    #[test]
    fn invalid_signer_key_rejected() {
        assert!(ProtocolConfig::builder().trusted_signer_hex("invalid").build().is_err());
    }

    #[test]
    fn valid_signer_key_accepted() {
        let key = AdmissionSigningKey::from_seed(&[3u8; 32]);
        let hex_key = hex::encode(key.verifying_key().to_bytes());
        let config = ProtocolConfig::builder()
            .trusted_signer_hex(hex_key)
            .build()
            .unwrap();
        let signer = config.trusted_signer().unwrap().unwrap();
        assert_eq!(signer.address(), key.address());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CNST_CHAIN_ID", "17000"),
            ("CNST_TARGET_RATIO_BPS", "2000"),
            ("CNST_MINIMUM_RATIO_BPS", "1000"),
            ("CNST_ADMIN_CHECK", "false"),
            ("CNST_LOG_JSON", "true"),
        ]);
        let config = ProtocolConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.admission.chain_id, 17000);
        assert_eq!(config.collateral.target_ratio, Wad::from_percent(20));
        assert_eq!(config.collateral.minimum_ratio, Wad::from_percent(10));
        assert!(!config.admission.admin_check);
        assert!(config.logging.json_output);
    }

    #[test]
    fn lookup_covers_skew_vaults_and_fees() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CNST_MAX_FUTURE_SKEW_SECS", "30"),
            ("CNST_ETH_RESERVE_BPS", "500"),
            ("CNST_RPL_RESERVE_BPS", "300"),
            ("CNST_MIN_COVERAGE_BPS", "1200"),
            ("CNST_TREASURY_FEE_BPS", "100"),
            ("CNST_OPERATOR_FEE_BPS", "900"),
        ]);
        let config = ProtocolConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.admission.max_future_skew_secs, 30);
        assert_eq!(config.vaults.eth_reserve_ratio, Wad::from_percent(5));
        assert_eq!(config.vaults.rpl_reserve_ratio, Wad::from_percent(3));
        assert_eq!(config.vaults.minimum_coverage_ratio, Wad::from_percent(12));
        assert_eq!(config.rewards.treasury_fee, Wad::from_percent(1));
        assert_eq!(config.rewards.operator_fee, Wad::from_percent(9));

        let built = ProtocolConfig::builder()
            .max_future_skew_secs(0)
            .minimum_coverage_ratio(Wad::from_percent(20))
            .build()
            .unwrap();
        assert_eq!(built.admission.max_future_skew_secs, 0);
        assert_eq!(built.vaults.minimum_coverage_ratio, Wad::from_percent(20));
    }

    #[test]
    fn unparsable_variable_is_a_config_error() {
        let result = ProtocolConfig::from_lookup(|k| {
            (k == "CNST_ORACLE_MAX_AGE_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConstellationError::ConfigError(_))));
    }

    #[test]
    fn config_serializes_to_json() {
        let config = ProtocolConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ProtocolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.admission.bond_amount, config.admission.bond_amount);
    }
}
