//! Vault liquidity rebalancing.
//!
//! Each public vault keeps a reserve of liquid assets equal to `reserve_ratio` of its
//! total assets. When the reserve runs low the distributor tops it up with
//! `min(missing, available)`. The principal vault takes wrapped ETH; only the part of the
//! top-up not already covered by wrapped balance is wrapped from native ETH.

use crate::config::ProtocolConfig;
use crate::distributor::Distributor;
use crate::math::{mul_div_floor, wad_div, wad_mul, WAD};
use crate::oracle::OracleReading;
use crate::{Amount, ConstellationError, Result, Timestamp, Wad};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Vault accounting as reported by the external share layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub total_assets: Amount,
    pub liquid_assets: Amount,
}

/// Liquidity the vault is short of its reserve target.
pub fn missing_liquidity(vault: &VaultSnapshot, reserve_ratio: Wad) -> Result<Amount> {
    let target = wad_mul(vault.total_assets, reserve_ratio)?;
    Ok(target.saturating_sub(vault.liquid_assets))
}

/// `min(required, available)`: never more than available, never negative.
pub fn top_up(required: Amount, available: Amount) -> Amount {
    required.min(available)
}

/// Native ETH to wrap so that `wrapped_balance` covers `top_up`.
pub fn wrap_needed(top_up: Amount, wrapped_balance: Amount) -> Amount {
    top_up.saturating_sub(wrapped_balance)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPlan {
    /// Wrapped ETH sent to the principal vault.
    pub eth_top_up: Amount,
    /// Native ETH wrapped before sending.
    pub eth_to_wrap: Amount,
    /// RPL sent to the collateral vault.
    pub rpl_top_up: Amount,
}

impl LiquidityPlan {
    pub fn is_empty(&self) -> bool {
        self.eth_top_up.is_zero() && self.rpl_top_up.is_zero()
    }
}

#[derive(Clone, Debug)]
pub struct VaultLiquidityRebalancer {
    eth_reserve_ratio: Wad,
    rpl_reserve_ratio: Wad,
    minimum_coverage_ratio: Wad,
    oracle_max_age_secs: u64,
}

impl VaultLiquidityRebalancer {
    pub fn new(
        eth_reserve_ratio: Wad,
        rpl_reserve_ratio: Wad,
        minimum_coverage_ratio: Wad,
        oracle_max_age_secs: u64,
    ) -> Result<Self> {
        for (name, ratio) in [("eth", eth_reserve_ratio), ("rpl", rpl_reserve_ratio)] {
            if ratio > Wad::ONE {
                return Err(ConstellationError::InvalidInput(format!(
                    "{name} reserve ratio {ratio} exceeds 1.0"
                )));
            }
        }
        if minimum_coverage_ratio.is_zero() {
            return Err(ConstellationError::InvalidInput(
                "minimum coverage ratio must be positive".into(),
            ));
        }
        Ok(Self {
            eth_reserve_ratio,
            rpl_reserve_ratio,
            minimum_coverage_ratio,
            oracle_max_age_secs,
        })
    }

    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        Self::new(
            config.vaults.eth_reserve_ratio,
            config.vaults.rpl_reserve_ratio,
            config.vaults.minimum_coverage_ratio,
            config.oracle.max_age_secs,
        )
    }

    /// Compute transfers for both vaults against current distributor balances.
    pub fn plan(
        &self,
        distributor: &Distributor,
        eth_vault: &VaultSnapshot,
        rpl_vault: &VaultSnapshot,
    ) -> Result<LiquidityPlan> {
        let balances = distributor.balances();

        let eth_missing = missing_liquidity(eth_vault, self.eth_reserve_ratio)?;
        let eth_top_up = top_up(eth_missing, distributor.available_principal()?);
        let eth_to_wrap = wrap_needed(eth_top_up, balances.wrapped_eth);

        let rpl_missing = missing_liquidity(rpl_vault, self.rpl_reserve_ratio)?;
        let rpl_top_up = top_up(rpl_missing, balances.rpl);

        Ok(LiquidityPlan {
            eth_top_up,
            eth_to_wrap,
            rpl_top_up,
        })
    }

    /// Apply `plan` to the distributor. The returned plan is what the caller forwards to
    /// the vaults.
    pub fn execute(&self, plan: &LiquidityPlan, distributor: &mut Distributor) -> Result<()> {
        if plan.is_empty() {
            debug!("Vault liquidity already at reserve");
            return Ok(());
        }
        let before = distributor.balances();
        if plan.eth_to_wrap > before.native_eth || plan.rpl_top_up > before.rpl {
            return Err(ConstellationError::InvariantViolation(
                "liquidity plan exceeds distributor balances".into(),
            ));
        }
        if !plan.eth_to_wrap.is_zero() {
            distributor.wrap(plan.eth_to_wrap)?;
        }
        distributor.debit_wrapped(plan.eth_top_up)?;
        distributor.debit_rpl(plan.rpl_top_up)?;
        info!(
            eth_top_up = %plan.eth_top_up,
            eth_wrapped = %plan.eth_to_wrap,
            rpl_top_up = %plan.rpl_top_up,
            "Vault liquidity rebalanced"
        );
        Ok(())
    }

    /// Plan and execute in one step.
    pub fn rebalance(
        &self,
        distributor: &mut Distributor,
        eth_vault: &VaultSnapshot,
        rpl_vault: &VaultSnapshot,
    ) -> Result<LiquidityPlan> {
        let plan = self.plan(distributor, eth_vault, rpl_vault)?;
        self.execute(&plan, distributor)?;
        Ok(plan)
    }

    /// Further ETH the principal vault may accept while collateral value still covers
    /// `minimum_coverage_ratio` of principal.
    pub fn principal_deposit_limit(
        &self,
        principal_assets: Amount,
        collateral_assets: Amount,
        reading: &OracleReading,
        now: Timestamp,
    ) -> Result<Amount> {
        let price = reading.fresh_price(now, self.oracle_max_age_secs)?;
        let collateral_value = Amount::new(mul_div_floor(collateral_assets.get(), price.raw(), WAD)?);
        let max_principal = wad_div(collateral_value, self.minimum_coverage_ratio)?;
        Ok(max_principal.saturating_sub(principal_assets))
    }
}
