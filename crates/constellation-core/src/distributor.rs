//! Internal distributor holding pooled liquidity between the vaults and validators.
//!
//! Principal is held as native ETH and wrapped ETH (1:1); collateral as RPL. The
//! distributor is also the settlement target of forfeited escrow and swept rewards.

use crate::escrow::ValueTransfer;
use crate::{Address, Amount, ConstellationError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorBalances {
    pub native_eth: Amount,
    pub wrapped_eth: Amount,
    pub rpl: Amount,
}

/// How a bond debit was split across native and wrapped ETH, for rollback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BondDebit {
    pub from_native: Amount,
    pub from_wrapped: Amount,
}

impl BondDebit {
    pub fn total(&self) -> Result<Amount> {
        self.from_native.checked_add(self.from_wrapped)
    }
}

#[derive(Clone, Debug)]
pub struct Distributor {
    address: Address,
    balances: DistributorBalances,
}

impl Distributor {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balances: DistributorBalances::default(),
        }
    }

    pub fn with_balances(address: Address, balances: DistributorBalances) -> Self {
        Self { address, balances }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn balances(&self) -> DistributorBalances {
        self.balances
    }

    /// Principal available to match new validators: native plus wrapped ETH.
    pub fn available_principal(&self) -> Result<Amount> {
        self.balances
            .native_eth
            .checked_add(self.balances.wrapped_eth)
    }

    pub fn credit_native(&mut self, amount: Amount) -> Result<()> {
        self.balances.native_eth = self.balances.native_eth.checked_add(amount)?;
        Ok(())
    }

    pub fn credit_wrapped(&mut self, amount: Amount) -> Result<()> {
        self.balances.wrapped_eth = self.balances.wrapped_eth.checked_add(amount)?;
        Ok(())
    }

    pub fn credit_rpl(&mut self, amount: Amount) -> Result<()> {
        self.balances.rpl = self.balances.rpl.checked_add(amount)?;
        Ok(())
    }

    pub fn debit_wrapped(&mut self, amount: Amount) -> Result<()> {
        self.balances.wrapped_eth = self.balances.wrapped_eth.checked_sub(amount)?;
        Ok(())
    }

    pub fn debit_rpl(&mut self, amount: Amount) -> Result<()> {
        self.balances.rpl = self.balances.rpl.checked_sub(amount)?;
        Ok(())
    }

    /// Convert native ETH to wrapped ETH.
    pub fn wrap(&mut self, amount: Amount) -> Result<()> {
        let native_eth = self.balances.native_eth.checked_sub(amount)?;
        let wrapped_eth = self.balances.wrapped_eth.checked_add(amount)?;
        self.balances.native_eth = native_eth;
        self.balances.wrapped_eth = wrapped_eth;
        Ok(())
    }

    /// Take `amount` of principal for a validator bond, native first, then wrapped.
    pub fn debit_bond(&mut self, amount: Amount) -> Result<BondDebit> {
        let available = self.available_principal()?;
        if amount > available {
            return Err(ConstellationError::InsufficientLiquidity {
                required: amount,
                available,
            });
        }
        let from_native = amount.min(self.balances.native_eth);
        let from_wrapped = amount.checked_sub(from_native)?;
        self.balances.native_eth = self.balances.native_eth.checked_sub(from_native)?;
        self.balances.wrapped_eth = self.balances.wrapped_eth.checked_sub(from_wrapped)?;
        debug!(%amount, %from_native, %from_wrapped, "Bond debited from distributor");
        Ok(BondDebit {
            from_native,
            from_wrapped,
        })
    }

    pub(crate) fn rollback_bond(&mut self, debit: &BondDebit) {
        self.balances.native_eth = Amount::new(
            self.balances
                .native_eth
                .get()
                .saturating_add(debit.from_native.get()),
        );
        self.balances.wrapped_eth = Amount::new(
            self.balances
                .wrapped_eth
                .get()
                .saturating_add(debit.from_wrapped.get()),
        );
    }
}

/// Settlement into the distributor; any other recipient is refused.
impl ValueTransfer for Distributor {
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<()> {
        if *to != self.address {
            return Err(ConstellationError::TransferFailed(format!(
                "distributor {} cannot settle to {to}",
                self.address
            )));
        }
        self.credit_native(amount)
    }
}
