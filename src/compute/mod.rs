//! Base lines, per-line tax computation, and rounding.
//!
//! The pipeline: build [`BaseLine`]s with [`BaseLineBuilder`], attach
//! details with [`add_tax_details`], then round with [`round_tax_details`].
//! Everything downstream (accounting lines, totals) reads the details
//! without mutating them.

mod base_line;
mod details;
mod rounding;

pub use base_line::*;
pub use details::*;
pub use rounding::*;
