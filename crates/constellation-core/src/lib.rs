use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod address;
pub mod admission;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod distributor;
pub mod escrow;
pub mod hash;
pub mod math;
pub mod metrics;
pub mod nonce;
pub mod oracle;
pub mod registry;
pub mod rewards;
pub mod signature;
pub mod stake_rebalancer;
pub mod telemetry;
pub mod vault;
pub mod whitelist;

pub use admission::{AdmissionController, AdmissionReceipt, AdmissionRequest, AdmissionStage};

pub use config::ProtocolConfig;

pub use crypto::{AdmissionSigningKey, AdmissionVerifyingKey};

pub use directory::Role;

pub use math::Wad;

/// Seconds since the unix epoch, as supplied by the execution environment.
pub type Timestamp = u64;

/// 32-byte hash newtype used for digests and salts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

/// 20-byte account / contract address. Validator addresses double as escrow keys.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Take the trailing 20 bytes of a digest (EVM-style address truncation).
    pub fn from_digest(digest: &Hash32) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.0[12..]);
        Address(out)
    }

    /// Parse a `0x`-prefixed or bare 40-character hex address.
    pub fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)
            .map_err(|e| ConstellationError::InvalidInput(format!("Invalid address hex: {e}")))?;
        if bytes.len() != 20 {
            return Err(ConstellationError::InvalidInput(
                "Address must be exactly 20 bytes".into(),
            ));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Token amount in the asset's smallest unit (wei for ETH, 1e-18 RPL for RPL).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(v: u128) -> Amount {
        Amount(v)
    }

    /// Whole units (1e18 base units each).
    pub const fn ether(units: u128) -> Amount {
        Amount(units * math::WAD)
    }

    pub fn get(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| ConstellationError::BoundedValueExceeded("amount overflow in add".into()))
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| ConstellationError::InvalidInput("amount underflow in sub".into()))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unified error type for the admission, escrow and rebalancing core.
///
/// Each variant maps to a stable tag (see [`ConstellationError::tag`]) so off-protocol
/// tooling can tell a stale signature apart from a pool that is too small right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstellationError {
    // Authorization
    #[error("Bad signature: {0}")]
    BadSignature(String),

    #[error("Unauthorized: {caller} lacks role {role:?}")]
    Unauthorized { caller: Address, role: Role },

    // Replay protection
    #[error(
        "Replay rejected for {requester}: expected (epoch {expected_epoch}, nonce {expected_nonce}), got (epoch {got_epoch}, nonce {got_nonce})"
    )]
    Replay {
        requester: Address,
        expected_epoch: u64,
        expected_nonce: u64,
        got_epoch: u64,
        got_nonce: u64,
    },

    #[error("Signature expired: age {age_secs}s exceeds max {max_age_secs}s")]
    SignatureExpired { age_secs: u64, max_age_secs: u64 },

    #[error("Signature from future: skew {skew_secs}s")]
    SignatureFromFuture { skew_secs: u64 },

    // Address derivation
    #[error("Target address mismatch: predicted {expected}, supplied {supplied}")]
    AddressMismatch { expected: Address, supplied: Address },

    #[error("Factory derivation drift: predicted {predicted}, factory expects {factory}")]
    FactoryDrift { predicted: Address, factory: Address },

    // Escrow / registry
    #[error("Duplicate key {key}")]
    DuplicateKey { key: Address },

    #[error("No escrow record for {key}")]
    NotFound { key: Address },

    #[error("Escrow for {key} already released")]
    AlreadyReleased { key: Address },

    #[error("Validator registry rejected deployment: {0}")]
    RegistryRejected(String),

    #[error("Value transfer failed: {0}")]
    TransferFailed(String),

    // Admission gates
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: Amount, available: Amount },

    #[error("Requester {requester} is not eligible")]
    NotEligible { requester: Address },

    #[error("Capacity exceeded for {requester}: {active} active of {max} allowed")]
    CapacityExceeded {
        requester: Address,
        active: u64,
        max: u64,
    },

    #[error("Wrong value: expected exactly {expected}, supplied {supplied}")]
    WrongValue { expected: Amount, supplied: Amount },

    // Oracle
    #[error("Stale oracle: age {age_secs}s exceeds max {max_age_secs}s")]
    StaleOracle { age_secs: u64, max_age_secs: u64 },

    // Generic
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ConstellationError {
    /// Stable machine-readable tag for the error class.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BadSignature(_) => "BadSignature",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Replay { .. } => "ReplayError",
            Self::SignatureExpired { .. } => "SignatureExpired",
            Self::SignatureFromFuture { .. } => "SignatureFromFuture",
            Self::AddressMismatch { .. } => "AddressMismatch",
            Self::FactoryDrift { .. } => "FactoryDrift",
            Self::DuplicateKey { .. } => "DuplicateKeyError",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyReleased { .. } => "AlreadyReleased",
            Self::RegistryRejected(_) => "RegistryRejected",
            Self::TransferFailed(_) => "TransferFailed",
            Self::InsufficientLiquidity { .. } => "InsufficientLiquidity",
            Self::NotEligible { .. } => "NotEligible",
            Self::CapacityExceeded { .. } => "CapacityExceeded",
            Self::WrongValue { .. } => "WrongValue",
            Self::StaleOracle { .. } => "StaleOracle",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::InvalidInput(_) => "InvalidInput",
            Self::BoundedValueExceeded(_) => "BoundedValueExceeded",
            Self::CryptoError(_) => "CryptoError",
            Self::ConfigError(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConstellationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let addr = Address([0xab; 20]);
        let parsed = Address::from_hex(&addr.to_hex()).expect("valid hex");
        assert_eq!(parsed, addr);
        assert_eq!(Address::from_hex(&hex::encode([0xab; 20])).unwrap(), addr);
    }

    #[test]
    fn address_from_hex_rejects_wrong_length() {
        let result = Address::from_hex("0x1234");
        assert!(matches!(result, Err(ConstellationError::InvalidInput(_))));
    }

    #[test]
    fn address_from_digest_takes_trailing_bytes() {
        let mut digest = [0u8; 32];
        for (i, b) in digest.iter_mut().enumerate() {
            *b = i as u8;
        }
        let addr = Address::from_digest(&Hash32(digest));
        assert_eq!(addr.0[0], 12);
        assert_eq!(addr.0[19], 31);
    }

    #[test]
    fn amount_checked_arithmetic() {
        let a = Amount::new(5);
        assert_eq!(a.checked_add(Amount::new(3)).unwrap(), Amount::new(8));
        assert!(a.checked_sub(Amount::new(6)).is_err());
        assert_eq!(a.saturating_sub(Amount::new(6)), Amount::ZERO);
        assert!(Amount::new(u128::MAX).checked_add(Amount::new(1)).is_err());
    }

    #[test]
    fn error_tags_are_distinct_for_signature_and_replay() {
        let bad = ConstellationError::BadSignature("x".into());
        let replay = ConstellationError::Replay {
            requester: Address::ZERO,
            expected_epoch: 0,
            expected_nonce: 1,
            got_epoch: 0,
            got_nonce: 0,
        };
        let mismatch = ConstellationError::AddressMismatch {
            expected: Address::ZERO,
            supplied: Address([1; 20]),
        };
        assert_eq!(bad.tag(), "BadSignature");
        assert_eq!(replay.tag(), "ReplayError");
        assert_eq!(mismatch.tag(), "AddressMismatch");
    }
}
