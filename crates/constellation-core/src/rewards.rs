//! Apportionment of validator rewards that arrive after the fact.
//!
//! Beacon/validator rewards land in the distributor in arrears. Each sweep splits the
//! amount into treasury and operator fees and the remainder owed to vault holders. Fees
//! round down; the rounding dust always goes to the vault so the three parts sum exactly
//! to the swept amount.

use crate::config::ProtocolConfig;
use crate::distributor::Distributor;
use crate::math::wad_mul;
use crate::{Amount, ConstellationError, Result, Wad};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShares {
    pub treasury: Amount,
    pub operators: Amount,
    pub vault: Amount,
}

/// Running totals of swept rewards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardLedger {
    pub treasury_balance: Amount,
    pub operator_balance: Amount,
    /// Rewards now backing vault shares.
    pub vault_accrued_principal: Amount,
}

#[derive(Clone, Debug)]
pub struct RewardSplitter {
    treasury_fee: Wad,
    operator_fee: Wad,
}

impl RewardSplitter {
    pub fn new(treasury_fee: Wad, operator_fee: Wad) -> Result<Self> {
        let total = treasury_fee
            .raw()
            .checked_add(operator_fee.raw())
            .ok_or_else(|| ConstellationError::BoundedValueExceeded("fee sum overflow".into()))?;
        if total > Wad::ONE.raw() {
            return Err(ConstellationError::InvalidInput(format!(
                "treasury fee {treasury_fee} plus operator fee {operator_fee} exceeds 1.0"
            )));
        }
        Ok(Self {
            treasury_fee,
            operator_fee,
        })
    }

    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        Self::new(config.rewards.treasury_fee, config.rewards.operator_fee)
    }

    pub fn apportion(&self, amount: Amount) -> Result<RewardShares> {
        let treasury = wad_mul(amount, self.treasury_fee)?;
        let operators = wad_mul(amount, self.operator_fee)?;
        let vault = amount.checked_sub(treasury)?.checked_sub(operators)?;
        Ok(RewardShares {
            treasury,
            operators,
            vault,
        })
    }

    /// Split `amount` of newly arrived rewards and book it. The vault share is
    /// credited to the distributor as principal liquidity.
    pub fn sweep_rewards(
        &self,
        amount: Amount,
        ledger: &mut RewardLedger,
        distributor: &mut Distributor,
    ) -> Result<RewardShares> {
        let shares = self.apportion(amount)?;

        let mut next = *ledger;
        next.treasury_balance = next.treasury_balance.checked_add(shares.treasury)?;
        next.operator_balance = next.operator_balance.checked_add(shares.operators)?;
        next.vault_accrued_principal = next.vault_accrued_principal.checked_add(shares.vault)?;
        distributor.credit_native(shares.vault)?;
        *ledger = next;

        info!(
            %amount,
            treasury = %shares.treasury,
            operators = %shares.operators,
            vault = %shares.vault,
            "Rewards swept"
        );
        Ok(shares)
    }
}
