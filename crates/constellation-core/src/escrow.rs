//! Per-validator escrow ledger.
//!
//! The ledger only authorizes and accounts for value movement; it never moves value
//! itself. A successful [`EscrowLedger::release`] returns a [`ReleaseAuthorization`] that
//! the caller settles through a [`ValueTransfer`]. Settlement can be retried on transient
//! failure without releasing twice.
//!
//! Invariant (checked after every mutation): `sum(active locked amounts) == total_locked`.

use crate::{Address, Amount, ConstellationError, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscrowRecord {
    pub owner: Address,
    pub locked_amount: Amount,
    pub active: bool,
}

/// Permission to move `amount` of escrowed value to `recipient`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseAuthorization {
    pub key: Address,
    pub recipient: Address,
    pub amount: Amount,
}

impl ReleaseAuthorization {
    /// Move the authorized value. Safe to call again if a previous attempt failed.
    pub fn settle<T: ValueTransfer + ?Sized>(&self, transfer: &mut T) -> Result<()> {
        if self.amount.is_zero() {
            return Ok(());
        }
        transfer.transfer(&self.recipient, self.amount).map_err(|e| {
            warn!(key = %self.key, recipient = %self.recipient, error = %e, "Escrow settlement failed");
            e
        })
    }
}

/// Moves value out of escrow custody.
pub trait ValueTransfer {
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct EscrowLedger {
    records: HashMap<Address, EscrowRecord>,
    total_locked: Amount,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_locked(&self) -> Amount {
        self.total_locked
    }

    pub fn get(&self, key: &Address) -> Option<&EscrowRecord> {
        self.records.get(key)
    }

    /// Whether `key` was ever used, active or released.
    pub fn contains(&self, key: &Address) -> bool {
        self.records.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.active).count()
    }

    /// Lock `amount` under `key`. Keys are single-use.
    pub fn create(&mut self, key: Address, owner: Address, amount: Amount) -> Result<()> {
        if self.records.contains_key(&key) {
            return Err(ConstellationError::DuplicateKey { key });
        }
        let total_locked = self.total_locked.checked_add(amount)?;
        self.records.insert(
            key,
            EscrowRecord {
                owner,
                locked_amount: amount,
                active: true,
            },
        );
        self.total_locked = total_locked;
        self.check_invariants()?;
        debug!(%key, %owner, %amount, "Escrow created");
        Ok(())
    }

    /// Deactivate the record under `key` and authorize paying its amount to `recipient`.
    pub fn release(&mut self, key: &Address, recipient: Address) -> Result<ReleaseAuthorization> {
        let record = self
            .records
            .get_mut(key)
            .ok_or(ConstellationError::NotFound { key: *key })?;
        if !record.active {
            return Err(ConstellationError::AlreadyReleased { key: *key });
        }
        let amount = record.locked_amount;
        let total_locked = self.total_locked.checked_sub(amount)?;
        record.active = false;
        self.total_locked = total_locked;
        self.check_invariants()?;
        debug!(%key, %recipient, %amount, "Escrow released");
        Ok(ReleaseAuthorization {
            key: *key,
            recipient,
            amount,
        })
    }

    pub fn check_invariants(&self) -> Result<()> {
        let mut sum = Amount::ZERO;
        for record in self.records.values().filter(|r| r.active) {
            sum = sum.checked_add(record.locked_amount)?;
        }
        if sum != self.total_locked {
            return Err(ConstellationError::InvariantViolation(format!(
                "escrow total_locked {} != sum of active records {}",
                self.total_locked, sum
            )));
        }
        Ok(())
    }

    /// Undo a [`create`](Self::create) inside an uncommitted admission.
    pub(crate) fn rollback_create(&mut self, key: &Address) {
        if let Some(record) = self.records.remove(key) {
            debug_assert!(record.active);
            self.total_locked = self.total_locked.saturating_sub(record.locked_amount);
        }
    }
}
