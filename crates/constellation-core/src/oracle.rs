//! Price oracle boundary.
//!
//! The core only consumes `(price, updated_at)` readings. A reading older than the
//! configured maximum age is a hard block on every dependent operation.

use crate::{ConstellationError, Result, Timestamp, Wad};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// ETH per 1 RPL, 1e18-scaled, as of `updated_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleReading {
    pub price: Wad,
    pub updated_at: Timestamp,
}

impl OracleReading {
    /// Price if the reading is at most `max_age_secs` old at `now`.
    ///
    /// A zero price is rejected: every consumer divides by it.
    pub fn fresh_price(&self, now: Timestamp, max_age_secs: u64) -> Result<Wad> {
        let age_secs = now.saturating_sub(self.updated_at);
        if age_secs > max_age_secs {
            warn!(age_secs, max_age_secs, "Rejecting stale oracle reading");
            return Err(ConstellationError::StaleOracle {
                age_secs,
                max_age_secs,
            });
        }
        if self.price.is_zero() {
            return Err(ConstellationError::InvalidInput("oracle price is zero".into()));
        }
        Ok(self.price)
    }
}

pub trait PriceOracle {
    fn latest(&self) -> Result<OracleReading>;
}

/// Oracle serving a manually set reading (simulation and tests).
#[derive(Clone, Debug)]
pub struct ManualPriceOracle {
    reading: OracleReading,
}

impl ManualPriceOracle {
    pub fn new(price: Wad, updated_at: Timestamp) -> Self {
        Self {
            reading: OracleReading { price, updated_at },
        }
    }

    pub fn set(&mut self, price: Wad, updated_at: Timestamp) {
        self.reading = OracleReading { price, updated_at };
    }
}

impl PriceOracle for ManualPriceOracle {
    fn latest(&self) -> Result<OracleReading> {
        Ok(self.reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_reading_passes() {
        let oracle = ManualPriceOracle::new(Wad::from_percent(1), 1_000);
        let reading = oracle.latest().unwrap();
        assert_eq!(reading.fresh_price(1_100, 100).unwrap(), Wad::from_percent(1));
    }

    #[test]
    fn stale_reading_is_rejected() {
        let reading = OracleReading {
            price: Wad::ONE,
            updated_at: 1_000,
        };
        assert_eq!(
            reading.fresh_price(1_101, 100),
            Err(ConstellationError::StaleOracle {
                age_secs: 101,
                max_age_secs: 100
            })
        );
    }

    #[test]
    fn zero_price_is_rejected() {
        let reading = OracleReading {
            price: Wad::ZERO,
            updated_at: 1_000,
        };
        assert!(matches!(
            reading.fresh_price(1_000, 100),
            Err(ConstellationError::InvalidInput(_))
        ));
    }
}
