//! Deterministic validator address prediction.
//!
//! The external factory deploys each validator contract at a CREATE2-style address. The
//! deployer it sees is not the requester but an intermediate proxy, whose own address is
//! derived from `(requester, salt)`. Prediction therefore runs two levels:
//!
//! 1. `proxy     = derive(proxy_factory, H(PROXY || requester || salt), proxy_init_hash)`
//! 2. `validator = derive(validator_factory, H(VALIDATOR || proxy || deployment_salt), validator_init_hash)`
//!
//! where `deployment_salt = H(salt || H(key_material))` is the salt handed to the factory.
//! The derivation formula itself is a strategy so it can be swapped to mirror a different
//! factory without touching the admission controller.

use crate::hash::{
    hash_key_material, sha256, sha256_domain, PROXY_SALT_DOMAIN_V1, VALIDATOR_SALT_DOMAIN_V1,
};
use crate::{Address, Hash32};
use serde::{Deserialize, Serialize};

/// Prefix byte of the CREATE2 preimage.
pub const CREATE2_PREFIX: u8 = 0xff;

/// Address derivation used by a deploying factory.
pub trait DerivationFormula: Send + Sync {
    fn derive(&self, deployer: &Address, salt: &Hash32, init_code_hash: &Hash32) -> Address;
}

/// `trailing20(H(0xff || deployer || salt || init_code_hash))`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Create2Formula;

impl DerivationFormula for Create2Formula {
    fn derive(&self, deployer: &Address, salt: &Hash32, init_code_hash: &Hash32) -> Address {
        let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
        preimage.push(CREATE2_PREFIX);
        preimage.extend_from_slice(&deployer.0);
        preimage.extend_from_slice(&salt.0);
        preimage.extend_from_slice(&init_code_hash.0);
        Address::from_digest(&sha256(&preimage))
    }
}

/// Deployment parameters of the two factories involved in a validator deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryParams {
    pub proxy_factory: Address,
    pub proxy_init_code_hash: Hash32,
    pub validator_factory: Address,
    pub validator_init_code_hash: Hash32,
}

/// Both derivation levels plus the salt handed to the validator factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredictedAddresses {
    pub proxy: Address,
    pub deployment_salt: Hash32,
    pub validator: Address,
}

#[derive(Clone, Debug)]
pub struct AddressPredictor<F = Create2Formula> {
    params: FactoryParams,
    formula: F,
}

impl AddressPredictor<Create2Formula> {
    pub fn new(params: FactoryParams) -> Self {
        Self::with_formula(params, Create2Formula)
    }
}

impl<F: DerivationFormula> AddressPredictor<F> {
    pub fn with_formula(params: FactoryParams, formula: F) -> Self {
        Self { params, formula }
    }

    pub fn params(&self) -> &FactoryParams {
        &self.params
    }

    /// Level 1: the proxy that will act as deployer for `requester`.
    pub fn proxy_address(&self, requester: &Address, salt: u128) -> Address {
        let mut data = Vec::with_capacity(20 + 16);
        data.extend_from_slice(&requester.0);
        data.extend_from_slice(&salt.to_le_bytes());
        let proxy_salt = sha256_domain(PROXY_SALT_DOMAIN_V1, &data);
        self.formula.derive(
            &self.params.proxy_factory,
            &proxy_salt,
            &self.params.proxy_init_code_hash,
        )
    }

    /// Level 2: the validator address the factory assigns to `(deployer, deployment_salt)`.
    pub fn validator_address(&self, deployer: &Address, deployment_salt: &Hash32) -> Address {
        let mut data = Vec::with_capacity(20 + 32);
        data.extend_from_slice(&deployer.0);
        data.extend_from_slice(&deployment_salt.0);
        let factory_salt = sha256_domain(VALIDATOR_SALT_DOMAIN_V1, &data);
        self.formula.derive(
            &self.params.validator_factory,
            &factory_salt,
            &self.params.validator_init_code_hash,
        )
    }

    /// Full two-level prediction for an admission request.
    pub fn predict(
        &self,
        requester: &Address,
        salt: u128,
        key_material: &[u8],
    ) -> PredictedAddresses {
        let proxy = self.proxy_address(requester, salt);
        let deployment_salt = deployment_salt(salt, key_material);
        let validator = self.validator_address(&proxy, &deployment_salt);
        PredictedAddresses {
            proxy,
            deployment_salt,
            validator,
        }
    }
}

/// Salt handed to the validator factory: `H(salt_le || H(key_material))`.
pub fn deployment_salt(salt: u128, key_material: &[u8]) -> Hash32 {
    let mut data = Vec::with_capacity(16 + 32);
    data.extend_from_slice(&salt.to_le_bytes());
    data.extend_from_slice(&hash_key_material(key_material).0);
    sha256(&data)
}
