//! Admission replay protection.
//!
//! Two orthogonal counters guard every signed admission:
//! - a global epoch, bumped by [`NonceRegistry::invalidate_all`] to void every outstanding
//!   signature at once;
//! - a per-requester nonce, bumped on each successful admission and by
//!   [`NonceRegistry::invalidate_one`] to void exactly one outstanding signature.
//!
//! A signature is usable only while its embedded `(epoch, nonce)` equals the current pair.
//! Counters only ever increase.

use crate::{Address, ConstellationError, Result};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonceRegistry {
    epoch: u64,
    per_requester: HashMap<Address, u64>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch
    }

    /// Requesters that never transacted start at nonce 0.
    pub fn current_nonce(&self, requester: &Address) -> u64 {
        self.per_requester.get(requester).copied().unwrap_or(0)
    }

    /// Read-only replay check; used by simulation before anything is committed.
    pub fn check(&self, requester: &Address, epoch: u64, nonce: u64) -> Result<()> {
        let expected_nonce = self.current_nonce(requester);
        if epoch != self.epoch || nonce != expected_nonce {
            return Err(ConstellationError::Replay {
                requester: *requester,
                expected_epoch: self.epoch,
                expected_nonce,
                got_epoch: epoch,
                got_nonce: nonce,
            });
        }
        Ok(())
    }

    /// Consume `(epoch, nonce)` for `requester`, advancing its nonce by exactly one.
    pub fn consume(&mut self, requester: &Address, epoch: u64, nonce: u64) -> Result<()> {
        self.check(requester, epoch, nonce)?;
        let next = bump(nonce)?;
        self.per_requester.insert(*requester, next);
        debug!(%requester, epoch, nonce, "Nonce consumed");
        Ok(())
    }

    /// Void every outstanding signature by advancing the global epoch.
    ///
    /// Per-requester counters are untouched.
    pub fn invalidate_all(&mut self) -> Result<u64> {
        self.epoch = bump(self.epoch)?;
        info!(epoch = self.epoch, "All admission signatures invalidated");
        Ok(self.epoch)
    }

    /// Void the single outstanding signature of `requester`.
    pub fn invalidate_one(&mut self, requester: &Address) -> Result<u64> {
        let next = bump(self.current_nonce(requester))?;
        self.per_requester.insert(*requester, next);
        info!(%requester, nonce = next, "Admission signature invalidated for requester");
        Ok(next)
    }

    /// Undo a [`consume`](Self::consume) inside an uncommitted admission.
    pub(crate) fn rollback_consume(&mut self, requester: &Address, consumed_nonce: u64) {
        debug_assert_eq!(self.current_nonce(requester), consumed_nonce + 1);
        if consumed_nonce == 0 {
            self.per_requester.remove(requester);
        } else {
            self.per_requester.insert(*requester, consumed_nonce);
        }
    }
}

fn bump(v: u64) -> Result<u64> {
    v.checked_add(1)
        .ok_or_else(|| ConstellationError::BoundedValueExceeded("nonce counter overflow".into()))
}
