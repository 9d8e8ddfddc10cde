//! External validator registry / factory boundary.
//!
//! The factory deploys a validator contract at an address it derives itself. Admission
//! compares its own prediction against [`ValidatorRegistry::expected_address`] before
//! committing, so a factory upgrade that changes the derivation surfaces as
//! `FactoryDrift` instead of a lost deposit.

use crate::address::{AddressPredictor, Create2Formula, DerivationFormula, FactoryParams};
use crate::{Address, Amount, ConstellationError, Hash32, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Deployment forwarded to the registry once every local check has passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub owner: Address,
    pub deployer: Address,
    pub deployment_salt: Hash32,
    pub expected_address: Address,
    pub key_material: Vec<u8>,
    /// Owner's locked value plus the bond matched from the distributor.
    pub deposit: Amount,
}

pub trait ValidatorRegistry {
    /// Address the factory will assign for `(deployer, salt)`.
    fn expected_address(&self, deployer: &Address, deployment_salt: &Hash32) -> Address;

    /// Deploy and register the validator. Must not leave partial state on error.
    fn deploy(&mut self, request: &DeploymentRequest) -> Result<Address>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedValidator {
    pub owner: Address,
    pub deposit: Amount,
    pub key_material: Vec<u8>,
}

/// In-memory factory deriving addresses with the same two-level scheme as admission.
#[derive(Clone, Debug)]
pub struct InMemoryValidatorRegistry<F = Create2Formula> {
    predictor: AddressPredictor<F>,
    deployed: HashMap<Address, DeployedValidator>,
    paused: bool,
}

impl InMemoryValidatorRegistry<Create2Formula> {
    pub fn new(params: FactoryParams) -> Self {
        Self::with_predictor(AddressPredictor::new(params))
    }
}

impl<F: DerivationFormula> InMemoryValidatorRegistry<F> {
    pub fn with_predictor(predictor: AddressPredictor<F>) -> Self {
        Self {
            predictor,
            deployed: HashMap::new(),
            paused: false,
        }
    }

    /// A paused factory rejects every deployment.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_deployed(&self, address: &Address) -> bool {
        self.deployed.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&DeployedValidator> {
        self.deployed.get(address)
    }

    pub fn deployed_count(&self) -> usize {
        self.deployed.len()
    }
}

impl<F: DerivationFormula> ValidatorRegistry for InMemoryValidatorRegistry<F> {
    fn expected_address(&self, deployer: &Address, deployment_salt: &Hash32) -> Address {
        self.predictor.validator_address(deployer, deployment_salt)
    }

    fn deploy(&mut self, request: &DeploymentRequest) -> Result<Address> {
        if self.paused {
            warn!(expected = %request.expected_address, "Registry paused; rejecting deployment");
            return Err(ConstellationError::RegistryRejected(
                "validator factory is paused".into(),
            ));
        }

        let address = self.expected_address(&request.deployer, &request.deployment_salt);
        if address != request.expected_address {
            return Err(ConstellationError::RegistryRejected(format!(
                "factory derived {address}, request expected {}",
                request.expected_address
            )));
        }
        if self.deployed.contains_key(&address) {
            return Err(ConstellationError::DuplicateKey { key: address });
        }

        self.deployed.insert(
            address,
            DeployedValidator {
                owner: request.owner,
                deposit: request.deposit,
                key_material: request.key_material.clone(),
            },
        );
        debug!(%address, owner = %request.owner, deposit = %request.deposit, "Validator deployed");
        Ok(address)
    }
}
