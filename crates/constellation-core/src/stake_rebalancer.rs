//! RPL collateral rebalancing.
//!
//! The collateral requirement is `target_ratio * matched_principal / price` RPL, where
//! `price` is ETH per RPL. All quantities are 1e18 fixed point and every division
//! truncates, so the requirement never rounds up against the pool.

use crate::config::ProtocolConfig;
use crate::math::{mul_div_floor, WAD};
use crate::oracle::OracleReading;
use crate::{Amount, ConstellationError, Result, Timestamp, Wad};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Live collateral position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralState {
    /// RPL already staked.
    pub existing_collateral: Amount,
    /// ETH principal matched into validators.
    pub matched_principal: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StakeAction {
    Stake(Amount),
    Unstake(Amount),
    Noop,
}

/// RPL required to back `matched` ETH at `target_ratio`.
pub fn required_collateral(matched: Amount, target_ratio: Wad, price: Wad) -> Result<Amount> {
    if matched.is_zero() {
        return Ok(Amount::ZERO);
    }
    mul_div_floor(matched.get(), target_ratio.raw(), price.raw()).map(Amount::new)
}

/// `max(0, required - collateral)`.
pub fn shortfall(collateral: Amount, matched: Amount, target_ratio: Wad, price: Wad) -> Result<Amount> {
    Ok(required_collateral(matched, target_ratio, price)?.saturating_sub(collateral))
}

/// `max(0, collateral - required)`.
pub fn surplus(collateral: Amount, matched: Amount, target_ratio: Wad, price: Wad) -> Result<Amount> {
    Ok(collateral.saturating_sub(required_collateral(matched, target_ratio, price)?))
}

/// Collateral value over matched principal; `None` when nothing is matched.
pub fn collateral_ratio(state: &CollateralState, price: Wad) -> Result<Option<Wad>> {
    if state.matched_principal.is_zero() {
        return Ok(None);
    }
    let value = mul_div_floor(state.existing_collateral.get(), price.raw(), WAD)?;
    Wad::from_ratio(value, state.matched_principal.get()).map(Some)
}

#[derive(Clone, Debug)]
pub struct StakeRebalancer {
    target_ratio: Wad,
    minimum_ratio: Wad,
    claim_interval_secs: u64,
    oracle_max_age_secs: u64,
    last_claim_at: Option<Timestamp>,
}

impl StakeRebalancer {
    pub fn new(
        target_ratio: Wad,
        minimum_ratio: Wad,
        claim_interval_secs: u64,
        oracle_max_age_secs: u64,
    ) -> Result<Self> {
        check_ratios(target_ratio, minimum_ratio)?;
        Ok(Self {
            target_ratio,
            minimum_ratio,
            claim_interval_secs,
            oracle_max_age_secs,
            last_claim_at: None,
        })
    }

    /// Build from the `collateral` and `oracle` sections.
    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        Self::new(
            config.collateral.target_ratio,
            config.collateral.minimum_ratio,
            config.collateral.claim_interval_secs,
            config.oracle.max_age_secs,
        )
    }

    pub fn target_ratio(&self) -> Wad {
        self.target_ratio
    }

    pub fn minimum_ratio(&self) -> Wad {
        self.minimum_ratio
    }

    pub fn set_ratios(&mut self, target_ratio: Wad, minimum_ratio: Wad) -> Result<()> {
        check_ratios(target_ratio, minimum_ratio)?;
        self.target_ratio = target_ratio;
        self.minimum_ratio = minimum_ratio;
        info!(%target_ratio, %minimum_ratio, "Collateral ratios updated");
        Ok(())
    }

    pub fn last_claim_at(&self) -> Option<Timestamp> {
        self.last_claim_at
    }

    /// Record a reward claim; starts a new claim interval.
    pub fn record_claim(&mut self, now: Timestamp) {
        self.last_claim_at = Some(now);
    }

    /// Whether a full claim interval has elapsed since the last claim.
    pub fn claim_gate_open(&self, now: Timestamp) -> bool {
        match self.last_claim_at {
            None => true,
            Some(at) => now.saturating_sub(at) >= self.claim_interval_secs,
        }
    }

    /// Decide the next stake movement. Read-only; `available` bounds any stake.
    pub fn rebalance(
        &self,
        state: &CollateralState,
        reading: &OracleReading,
        available: Amount,
        now: Timestamp,
    ) -> Result<StakeAction> {
        let price = reading.fresh_price(now, self.oracle_max_age_secs)?;

        let short = shortfall(
            state.existing_collateral,
            state.matched_principal,
            self.target_ratio,
            price,
        )?;
        if !short.is_zero() {
            let amount = short.min(available);
            debug!(shortfall = %short, %available, %amount, "Collateral shortfall");
            return Ok(if amount.is_zero() {
                StakeAction::Noop
            } else {
                StakeAction::Stake(amount)
            });
        }

        let excess = surplus(
            state.existing_collateral,
            state.matched_principal,
            self.target_ratio,
            price,
        )?;
        if !excess.is_zero() && self.claim_gate_open(now) {
            debug!(surplus = %excess, "Collateral surplus");
            return Ok(StakeAction::Unstake(excess));
        }
        Ok(StakeAction::Noop)
    }

    /// Whether the position still meets the minimum ratio.
    pub fn is_healthy(&self, state: &CollateralState, reading: &OracleReading, now: Timestamp) -> Result<bool> {
        let price = reading.fresh_price(now, self.oracle_max_age_secs)?;
        Ok(match collateral_ratio(state, price)? {
            None => true,
            Some(ratio) => ratio >= self.minimum_ratio,
        })
    }
}

fn check_ratios(target_ratio: Wad, minimum_ratio: Wad) -> Result<()> {
    if minimum_ratio > target_ratio {
        return Err(ConstellationError::InvalidInput(format!(
            "minimum ratio {minimum_ratio} exceeds target ratio {target_ratio}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PRICE: Wad = Wad::from_percent(1); // 0.01 ETH per RPL

    fn reading(updated_at: Timestamp) -> OracleReading {
        OracleReading {
            price: PRICE,
            updated_at,
        }
    }

    fn rebalancer() -> StakeRebalancer {
        StakeRebalancer::new(Wad::from_percent(15), Wad::from_percent(10), 86_400, 3_600).unwrap()
    }

    #[test]
    fn required_collateral_example() {
        // 100 ETH * 0.15 / 0.01 = 1500 RPL
        let required =
            required_collateral(Amount::ether(100), Wad::from_percent(15), PRICE).unwrap();
        assert_eq!(required, Amount::ether(1500));
    }

    #[test]
    fn shortfall_and_surplus_are_exclusive() {
        let target = Wad::from_percent(15);
        let s = shortfall(Amount::ether(1000), Amount::ether(100), target, PRICE).unwrap();
        assert_eq!(s, Amount::ether(500));
        assert!(surplus(Amount::ether(1000), Amount::ether(100), target, PRICE)
            .unwrap()
            .is_zero());
        assert_eq!(
            surplus(Amount::ether(1600), Amount::ether(100), target, PRICE).unwrap(),
            Amount::ether(100)
        );
    }

    #[test]
    fn zero_matched_means_zero_shortfall() {
        assert!(shortfall(Amount::ZERO, Amount::ZERO, Wad::ONE, PRICE)
            .unwrap()
            .is_zero());
    }

    #[test]
    fn stake_is_bounded_by_available() {
        let r = rebalancer();
        let state = CollateralState {
            existing_collateral: Amount::ZERO,
            matched_principal: Amount::ether(100),
        };
        assert_eq!(
            r.rebalance(&state, &reading(0), Amount::ether(3), 10).unwrap(),
            StakeAction::Stake(Amount::ether(3))
        );
        assert_eq!(
            r.rebalance(&state, &reading(0), Amount::ZERO, 10).unwrap(),
            StakeAction::Noop
        );
    }

    #[test]
    fn unstake_waits_for_claim_interval() {
        let mut r = rebalancer();
        let state = CollateralState {
            existing_collateral: Amount::ether(2000),
            matched_principal: Amount::ether(100),
        };
        r.record_claim(1_000);
        assert_eq!(
            r.rebalance(&state, &reading(1_000), Amount::ZERO, 2_000).unwrap(),
            StakeAction::Noop
        );
        let later = 1_000 + 86_400;
        assert_eq!(
            r.rebalance(&state, &reading(later), Amount::ZERO, later).unwrap(),
            StakeAction::Unstake(Amount::ether(500))
        );
    }

    #[test]
    fn stale_oracle_blocks_rebalance() {
        let r = rebalancer();
        let state = CollateralState {
            existing_collateral: Amount::ZERO,
            matched_principal: Amount::ether(1),
        };
        assert!(matches!(
            r.rebalance(&state, &reading(0), Amount::ether(1), 3_601),
            Err(ConstellationError::StaleOracle { .. })
        ));
    }

    #[test]
    fn health_against_minimum_ratio() {
        let r = rebalancer();
        // 1000 RPL * 0.01 = 10 ETH over 100 ETH = 0.10
        let at_min = CollateralState {
            existing_collateral: Amount::ether(1000),
            matched_principal: Amount::ether(100),
        };
        assert!(r.is_healthy(&at_min, &reading(0), 0).unwrap());
        let below = CollateralState {
            existing_collateral: Amount::ether(999),
            ..at_min
        };
        assert!(!r.is_healthy(&below, &reading(0), 0).unwrap());
    }

    #[test]
    fn minimum_above_target_rejected() {
        assert!(StakeRebalancer::new(Wad::from_percent(10), Wad::from_percent(15), 0, 0).is_err());
        let mut r = rebalancer();
        assert!(r.set_ratios(Wad::from_percent(5), Wad::from_percent(6)).is_err());
        assert_eq!(r.target_ratio(), Wad::from_percent(15));
    }

    proptest! {
        #[test]
        fn nothing_matched_means_no_shortfall(
            c in any::<u128>(),
            target_pct in 0u128..=100,
            price in 1u128..=u128::MAX,
        ) {
            let target = Wad::from_percent(target_pct);
            let price = Wad::from_raw(price);
            prop_assert!(shortfall(Amount::new(c), Amount::ZERO, target, price).unwrap().is_zero());
            prop_assert_eq!(
                surplus(Amount::new(c), Amount::ZERO, target, price).unwrap(),
                Amount::new(c)
            );
        }

        #[test]
        fn shortfall_monotone_in_collateral(
            c1 in 0u128..1_000_000_000_000_000_000_000_000,
            c2 in 0u128..1_000_000_000_000_000_000_000_000,
            m in 0u128..100_000_000_000_000_000_000_000,
        ) {
            let (lo, hi) = if c1 <= c2 { (c1, c2) } else { (c2, c1) };
            let target = Wad::from_percent(15);
            let s_lo = shortfall(Amount::new(lo), Amount::new(m), target, PRICE).unwrap();
            let s_hi = shortfall(Amount::new(hi), Amount::new(m), target, PRICE).unwrap();
            prop_assert!(s_hi <= s_lo);
        }

        #[test]
        fn shortfall_monotone_in_matched(
            c in 0u128..1_000_000_000_000_000_000_000_000,
            m1 in 0u128..100_000_000_000_000_000_000_000,
            m2 in 0u128..100_000_000_000_000_000_000_000,
        ) {
            let (lo, hi) = if m1 <= m2 { (m1, m2) } else { (m2, m1) };
            let target = Wad::from_percent(15);
            let s_lo = shortfall(Amount::new(c), Amount::new(lo), target, PRICE).unwrap();
            let s_hi = shortfall(Amount::new(c), Amount::new(hi), target, PRICE).unwrap();
            prop_assert!(s_lo <= s_hi);
        }

        #[test]
        fn stake_never_exceeds_available(
            c in 0u128..1_000_000_000_000_000_000_000,
            m in 0u128..1_000_000_000_000_000_000_000,
            available in 0u128..1_000_000_000_000_000_000_000,
        ) {
            let state = CollateralState {
                existing_collateral: Amount::new(c),
                matched_principal: Amount::new(m),
            };
            if let StakeAction::Stake(amount) =
                rebalancer().rebalance(&state, &reading(0), Amount::new(available), 0).unwrap()
            {
                prop_assert!(amount.get() <= available);
                prop_assert!(amount.get() > 0);
            }
        }
    }
}
