//! Fixed-point arithmetic with a single canonical 1e18 scale.
//!
//! All ratio math in the core goes through [`mul_div_floor`], which computes
//! `floor(a * b / denom)` over a full 256-bit intermediate product so realistic pool sizes
//! (1e24+ wei times 1e18-scaled ratios) never overflow silently. Division truncates
//! toward zero.

use crate::{Amount, ConstellationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical fixed-point scale (1.0 == 1e18).
pub const WAD: u128 = 1_000_000_000_000_000_000;

const LO_MASK: u128 = u64::MAX as u128;

/// Non-negative fixed-point decimal scaled by 1e18.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Wad(u128);

impl Wad {
    pub const ZERO: Wad = Wad(0);
    pub const ONE: Wad = Wad(WAD);

    /// Raw scaled value (`1.0 == 1e18`).
    pub const fn from_raw(raw: u128) -> Wad {
        Wad(raw)
    }

    /// `pct / 100`, e.g. `Wad::from_percent(15) == 0.15`.
    pub const fn from_percent(pct: u128) -> Wad {
        Wad(pct * (WAD / 100))
    }

    /// `num / den` truncated to 18 decimals.
    pub fn from_ratio(num: u128, den: u128) -> Result<Wad> {
        mul_div_floor(num, WAD, den).map(Wad)
    }

    pub fn raw(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Wad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:018}", self.0 / WAD, self.0 % WAD)
    }
}

/// Full 128x128 -> 256-bit product as `(hi, lo)`.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & LO_MASK);
    let (b_hi, b_lo) = (b >> 64, b & LO_MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    // Each term is < 2^64, so the sum is < 3 * 2^64 and cannot overflow.
    let mid = (ll >> 64) + (lh & LO_MASK) + (hl & LO_MASK);
    let lo = (ll & LO_MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// `floor(a * b / denom)` with a 256-bit intermediate.
///
/// Errors on `denom == 0` and when the quotient does not fit in 128 bits.
pub fn mul_div_floor(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(ConstellationError::InvalidInput("division by zero".into()));
    }
    let (hi, lo) = mul_wide(a, b);
    if hi == 0 {
        return Ok(lo / denom);
    }
    if hi >= denom {
        return Err(ConstellationError::BoundedValueExceeded(
            "u128 overflow in mul_div".into(),
        ));
    }

    // Restoring long division of (hi, lo) by denom; hi < denom keeps the quotient in range.
    let mut rem = hi;
    let mut quot: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        quot <<= 1;
        if carry == 1 || rem >= denom {
            rem = rem.wrapping_sub(denom);
            quot |= 1;
        }
    }
    Ok(quot)
}

/// `floor(amount * ratio)`.
pub fn wad_mul(amount: Amount, ratio: Wad) -> Result<Amount> {
    mul_div_floor(amount.get(), ratio.raw(), WAD).map(Amount::new)
}

/// `floor(amount / ratio)`.
pub fn wad_div(amount: Amount, ratio: Wad) -> Result<Amount> {
    mul_div_floor(amount.get(), WAD, ratio.raw()).map(Amount::new)
}
