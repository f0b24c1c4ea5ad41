//! # steuerkern
//!
//! Tax computation and rounding-distribution engine for business documents:
//! per-line base/tax breakdowns, per-tax-group subtotals, and the exact
//! accounting entries to post — under price-included taxes, base-affecting
//! tax chains, reverse charge, and two independent currency roundings.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating point.
//! The engine is purely functional over in-memory values: no I/O, no shared
//! state, and recomputing is idempotent.
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_decimal_macros::dec;
//! use steuerkern::compute::{Anchor, BaseLineBuilder, RoundingMode, add_tax_details, round_tax_details};
//! use steuerkern::tax::TaxBuilder;
//! use steuerkern::totals::get_tax_totals_summary;
//!
//! let vat = TaxBuilder::percent(1, "VAT 21%", dec!(21)).price_include(true).build().unwrap();
//! let mut lines = vec![
//!     BaseLineBuilder::new(dec!(121), dec!(1)).taxes(vec![vat]).build(),
//! ];
//! add_tax_details(&mut lines).unwrap();
//! round_tax_details(&mut lines, RoundingMode::Globally(Anchor::Mixed)).unwrap();
//!
//! let summary = get_tax_totals_summary(&lines, None).unwrap();
//! assert_eq!(summary.base_amount_currency, dec!(100.00));
//! assert_eq!(summary.tax_amount_currency, dec!(21.00));
//! assert_eq!(summary.total_amount_currency, dec!(121.00));
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Entry point |
//! |-------|-------------|
//! | Tax model & validation | [`tax::TaxBuilder`], [`tax::validate_taxes`] |
//! | Base lines | [`compute::BaseLineBuilder`] |
//! | Per-line computation | [`compute::add_tax_details`] |
//! | Rounding & delta distribution | [`compute::round_tax_details`] |
//! | Accounting repartition mapping | [`ledger::prepare_tax_lines`] |
//! | Totals summary | [`totals::get_tax_totals_summary`] |

pub mod compute;
pub mod ledger;
pub mod rounding;
pub mod tax;
pub mod totals;

// Re-export the main entry points at the crate root for convenience.
pub use crate::compute::{
    Anchor, BaseLine, BaseLineBuilder, Currency, RoundingMode, SpecialMode, TaxData, TaxDetails,
    add_tax_details, apply_discount, dispatch_delta_smoothly, merge_base_lines, round_tax_details,
    split_base_line,
};
pub use crate::ledger::{ExistingTaxLine, GroupingKey, TaxLine, TaxLinesDiff, prepare_tax_lines};
pub use crate::rounding::{RoundingMethod, round_to_precision};
pub use crate::tax::{SteuerError, Tax, TaxBuilder, TaxGroup, validate_taxes};
pub use crate::totals::{CashRounding, CashRoundingStrategy, TaxTotalsSummary, get_tax_totals_summary};
