//! Operator eligibility and capacity accounting.

use crate::{Address, ConstellationError, Result, Timestamp};
use std::collections::HashMap;
use tracing::info;

/// External eligibility registry consulted during admission.
pub trait EligibilityRegistry {
    fn is_eligible(&self, requester: &Address) -> bool;

    /// Validators currently active for `requester`.
    fn active_count(&self, requester: &Address) -> u64;

    /// Maximum concurrent validators allotted to `requester`.
    fn max_validators(&self, requester: &Address) -> u64;

    fn record_admitted(&mut self, requester: &Address) -> Result<()>;

    fn record_exited(&mut self, requester: &Address) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorEntry {
    /// Cleared on removal. The entry itself stays so live validators remain counted.
    pub eligible: bool,
    pub active_validators: u64,
    pub max_validators: u64,
    pub added_at: Timestamp,
}

/// In-memory whitelist of admitted operators.
#[derive(Clone, Debug, Default)]
pub struct OperatorWhitelist {
    operators: HashMap<Address, OperatorEntry>,
}

impl OperatorWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelist `operator`, or reinstate a removed one with its live validator count.
    pub fn add_operator(&mut self, operator: Address, max_validators: u64, now: Timestamp) -> Result<()> {
        match self.operators.get_mut(&operator) {
            Some(entry) if entry.eligible => Err(ConstellationError::InvalidInput(format!(
                "operator {operator} already whitelisted"
            ))),
            Some(entry) => {
                entry.eligible = true;
                entry.max_validators = max_validators;
                entry.added_at = now;
                info!(
                    %operator,
                    max_validators,
                    active = entry.active_validators,
                    "Operator reinstated"
                );
                Ok(())
            }
            None => {
                self.operators.insert(
                    operator,
                    OperatorEntry {
                        eligible: true,
                        active_validators: 0,
                        max_validators,
                        added_at: now,
                    },
                );
                info!(%operator, max_validators, "Operator whitelisted");
                Ok(())
            }
        }
    }

    /// Revoke eligibility. Running validators keep their accounting until exit.
    pub fn remove_operator(&mut self, operator: &Address) -> bool {
        match self.operators.get_mut(operator) {
            Some(entry) if entry.eligible => {
                entry.eligible = false;
                info!(%operator, active = entry.active_validators, "Operator removed from whitelist");
                true
            }
            _ => false,
        }
    }

    pub fn set_max_validators(&mut self, operator: &Address, max_validators: u64) -> Result<()> {
        let entry = self
            .operators
            .get_mut(operator)
            .ok_or(ConstellationError::NotEligible {
                requester: *operator,
            })?;
        entry.max_validators = max_validators;
        Ok(())
    }

    pub fn entry(&self, operator: &Address) -> Option<&OperatorEntry> {
        self.operators.get(operator)
    }
}

impl EligibilityRegistry for OperatorWhitelist {
    fn is_eligible(&self, requester: &Address) -> bool {
        self.operators.get(requester).is_some_and(|e| e.eligible)
    }

    fn active_count(&self, requester: &Address) -> u64 {
        self.operators
            .get(requester)
            .map(|e| e.active_validators)
            .unwrap_or(0)
    }

    fn max_validators(&self, requester: &Address) -> u64 {
        self.operators
            .get(requester)
            .map(|e| e.max_validators)
            .unwrap_or(0)
    }

    fn record_admitted(&mut self, requester: &Address) -> Result<()> {
        let entry = self
            .operators
            .get_mut(requester)
            .ok_or(ConstellationError::NotEligible {
                requester: *requester,
            })?;
        entry.active_validators = entry.active_validators.checked_add(1).ok_or_else(|| {
            ConstellationError::BoundedValueExceeded("active validator count overflow".into())
        })?;
        Ok(())
    }

    fn record_exited(&mut self, requester: &Address) -> Result<()> {
        let entry = self
            .operators
            .get_mut(requester)
            .ok_or(ConstellationError::NotFound { key: *requester })?;
        entry.active_validators = entry.active_validators.checked_sub(1).ok_or_else(|| {
            ConstellationError::InvariantViolation(format!(
                "operator {requester} has no active validators to exit"
            ))
        })?;
        Ok(())
    }
}
