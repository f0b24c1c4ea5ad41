//! Precision-step rounding.
//!
//! All rounding in the engine goes through [`round_to_precision`], which
//! takes the precision as a *step* (e.g. `0.01` for cents, `0.05` for Swiss
//! cash rounding) rather than a number of decimal places. This keeps coarse
//! cash-rounding steps and ordinary currency precisions on the same code
//! path.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// How to resolve a value landing between two precision steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMethod {
    /// Commercial rounding — midpoints move away from zero. Engine default.
    HalfUp,
    /// Banker's rounding — midpoints move to the even neighbour.
    HalfEven,
    /// Always away from zero.
    Up,
    /// Always towards zero.
    Down,
}

impl RoundingMethod {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Self::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Self::HalfEven => RoundingStrategy::MidpointNearestEven,
            Self::Up => RoundingStrategy::AwayFromZero,
            Self::Down => RoundingStrategy::ToZero,
        }
    }
}

/// Round `value` to a multiple of `precision`.
///
/// A non-positive `precision` returns `value` unchanged; the engine treats
/// it as "no rounding requested" rather than an error.
///
/// ```
/// use rust_decimal_macros::dec;
/// use steuerkern::rounding::{round_to_precision, RoundingMethod};
///
/// assert_eq!(round_to_precision(dec!(99.97), dec!(0.05), RoundingMethod::HalfUp), dec!(99.95));
/// assert_eq!(round_to_precision(dec!(2.675), dec!(0.01), RoundingMethod::HalfUp), dec!(2.68));
/// ```
pub fn round_to_precision(value: Decimal, precision: Decimal, method: RoundingMethod) -> Decimal {
    if precision <= Decimal::ZERO {
        return value;
    }
    let scaled = value / precision;
    scaled.round_dp_with_strategy(0, method.strategy()) * precision
}
