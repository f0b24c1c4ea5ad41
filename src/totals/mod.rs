//! Tax totals summary.
//!
//! Aggregates rounded tax details into the per-tax-group and per-document
//! subtotals a document footer displays, with optional cash rounding.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compute::{BaseLine, Currency};
use crate::rounding::{RoundingMethod, round_to_precision};
use crate::tax::{AmountType, SteuerError, TaxGroupId};

/// Label of the subtotal tax groups fall under by default.
pub const UNTAXED_AMOUNT: &str = "Untaxed Amount";

/// How a cash-rounding adjustment is worked into the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashRoundingStrategy {
    /// Add a synthetic untaxed line carrying the adjustment.
    AddInvoiceLine,
    /// Nudge the tax amount of the largest tax group. Silently dropped when
    /// the document has no tax group at all.
    BiggestTax,
}

/// Document-level rounding to a precision coarser than the currency's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashRounding {
    /// Target precision step, e.g. `0.05`.
    pub precision: Decimal,
    pub method: RoundingMethod,
    pub strategy: CashRoundingStrategy,
}

/// Aggregated amounts of one tax group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxGroupSummary {
    pub id: TaxGroupId,
    pub name: String,
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
    /// Base shown to the user; `None` when the group only contains fixed
    /// taxes (a base is meaningless), reconstructed tax-included for groups
    /// of price-included division taxes.
    pub display_base_amount_currency: Option<Decimal>,
    pub display_base_amount: Option<Decimal>,
}

/// One displayed subtotal with the tax groups listed under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtotal {
    pub name: String,
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
    pub tax_groups: Vec<TaxGroupSummary>,
}

/// The document footer: global totals plus ordered subtotals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTotalsSummary {
    pub currency: Currency,
    pub company_currency: Currency,
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
    pub total_amount_currency: Decimal,
    pub total_amount: Decimal,
    /// Set when an `AddInvoiceLine` cash rounding produced a synthetic base
    /// adjustment.
    pub cash_rounding_base_amount_currency: Option<Decimal>,
    pub cash_rounding_base_amount: Option<Decimal>,
    pub subtotals: Vec<Subtotal>,
}

struct GroupAggregate {
    name: String,
    preceding_subtotal: Option<String>,
    base_amount_currency: Decimal,
    base_amount: Decimal,
    tax_amount_currency: Decimal,
    tax_amount: Decimal,
    all_fixed: bool,
    all_division_included: bool,
}

/// Aggregate all lines into per-tax-group and per-document subtotals.
///
/// Groups are ordered by `(sequence, id)`. Every group falls under the
/// subtotal named by its `preceding_subtotal` (default [`UNTAXED_AMOUNT`]);
/// each subtotal's base accumulates the tax amounts of the groups listed
/// under earlier subtotals. Requires computed (and ideally rounded) details
/// on every line.
pub fn get_tax_totals_summary(
    base_lines: &[BaseLine],
    cash_rounding: Option<&CashRounding>,
) -> Result<TaxTotalsSummary, SteuerError> {
    for (index, line) in base_lines.iter().enumerate() {
        if line.tax_details.is_none() {
            return Err(SteuerError::MissingTaxDetails(format!(
                "base line {index} has no computed tax details to aggregate"
            )));
        }
    }

    let currency = base_lines
        .first()
        .map(|line| line.currency.clone())
        .unwrap_or_default();
    let company_currency = base_lines
        .first()
        .map(|line| line.company_currency.clone())
        .unwrap_or_default();

    let mut untaxed_currency = Decimal::ZERO;
    let mut untaxed_company = Decimal::ZERO;
    let mut groups: BTreeMap<(i32, TaxGroupId), GroupAggregate> = BTreeMap::new();
    let mut base_seen: Vec<(usize, TaxGroupId)> = Vec::new();

    for (line_index, line) in base_lines.iter().enumerate() {
        let details = line.tax_details.as_ref().unwrap();
        untaxed_currency += details.total_excluded_currency;
        untaxed_company += details.total_excluded;

        for data in &details.taxes_data {
            let tax_group = &data.tax.tax_group;
            let aggregate = groups
                .entry((tax_group.sequence, tax_group.id))
                .or_insert_with(|| GroupAggregate {
                    name: tax_group.name.clone(),
                    preceding_subtotal: tax_group.preceding_subtotal.clone(),
                    base_amount_currency: Decimal::ZERO,
                    base_amount: Decimal::ZERO,
                    tax_amount_currency: Decimal::ZERO,
                    tax_amount: Decimal::ZERO,
                    all_fixed: true,
                    all_division_included: true,
                });
            aggregate.tax_amount_currency += data.tax_amount_currency;
            aggregate.tax_amount += data.tax_amount;
            aggregate.all_fixed &= data.tax.amount_type == AmountType::Fixed;
            aggregate.all_division_included &=
                data.tax.amount_type == AmountType::Division && data.price_include;
            // One base contribution per line and group.
            if !base_seen.contains(&(line_index, tax_group.id)) {
                base_seen.push((line_index, tax_group.id));
                aggregate.base_amount_currency += data.base_amount_currency;
                aggregate.base_amount += data.base_amount;
            }
        }
    }

    let mut group_summaries: Vec<(Option<String>, TaxGroupSummary)> = groups
        .into_iter()
        .map(|((_, id), aggregate)| {
            let display_currency = if aggregate.all_fixed {
                None
            } else if aggregate.all_division_included {
                Some(aggregate.base_amount_currency + aggregate.tax_amount_currency)
            } else {
                Some(aggregate.base_amount_currency)
            };
            let display_company = if aggregate.all_fixed {
                None
            } else if aggregate.all_division_included {
                Some(aggregate.base_amount + aggregate.tax_amount)
            } else {
                Some(aggregate.base_amount)
            };
            (
                aggregate.preceding_subtotal,
                TaxGroupSummary {
                    id,
                    name: aggregate.name,
                    base_amount_currency: aggregate.base_amount_currency,
                    base_amount: aggregate.base_amount,
                    tax_amount_currency: aggregate.tax_amount_currency,
                    tax_amount: aggregate.tax_amount,
                    display_base_amount_currency: display_currency,
                    display_base_amount: display_company,
                },
            )
        })
        .collect();

    // Cash rounding adjusts the raw aggregates before subtotals are laid out.
    let mut cash_rounding_base_currency = None;
    let mut cash_rounding_base_company = None;
    if let Some(cash) = cash_rounding {
        let tax_total_currency: Decimal = group_summaries
            .iter()
            .map(|(_, group)| group.tax_amount_currency)
            .sum();
        let total_currency = untaxed_currency + tax_total_currency;
        let expected = round_to_precision(total_currency, cash.precision, cash.method);
        let diff_currency = expected - total_currency;
        if !diff_currency.is_zero() {
            let diff_company = round_to_precision(
                base_lines
                    .first()
                    .map(|line| line.to_company(diff_currency))
                    .unwrap_or(diff_currency),
                company_currency.rounding,
                RoundingMethod::HalfUp,
            );
            match cash.strategy {
                CashRoundingStrategy::AddInvoiceLine => {
                    cash_rounding_base_currency = Some(diff_currency);
                    cash_rounding_base_company = Some(diff_company);
                    untaxed_currency += diff_currency;
                    untaxed_company += diff_company;
                }
                CashRoundingStrategy::BiggestTax => {
                    let biggest = group_summaries
                        .iter_mut()
                        .map(|(_, group)| group)
                        .max_by_key(|group| group.tax_amount_currency);
                    match biggest {
                        Some(group) => {
                            group.tax_amount_currency += diff_currency;
                            group.tax_amount += diff_company;
                        }
                        None => {
                            tracing::warn!(
                                %diff_currency,
                                "cash rounding on biggest tax dropped: document has no tax group"
                            );
                        }
                    }
                }
            }
        }
    }

    // Lay out subtotals in first-appearance order, the default one first.
    fn find_subtotal(subtotals: &mut Vec<Subtotal>, name: &str) -> usize {
        if let Some(position) = subtotals.iter().position(|subtotal| subtotal.name == name) {
            position
        } else {
            subtotals.push(Subtotal {
                name: name.to_string(),
                base_amount_currency: Decimal::ZERO,
                base_amount: Decimal::ZERO,
                tax_amount_currency: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                tax_groups: Vec::new(),
            });
            subtotals.len() - 1
        }
    }
    let mut subtotals: Vec<Subtotal> = Vec::new();
    find_subtotal(&mut subtotals, UNTAXED_AMOUNT);
    for (preceding, group) in group_summaries {
        let name = preceding.as_deref().unwrap_or(UNTAXED_AMOUNT);
        let position = find_subtotal(&mut subtotals, name);
        subtotals[position].tax_amount_currency += group.tax_amount_currency;
        subtotals[position].tax_amount += group.tax_amount;
        subtotals[position].tax_groups.push(group);
    }

    // Each subtotal's base is the untaxed total plus the taxes of every
    // group listed under earlier subtotals.
    let mut running_currency = untaxed_currency;
    let mut running_company = untaxed_company;
    for subtotal in &mut subtotals {
        subtotal.base_amount_currency = running_currency;
        subtotal.base_amount = running_company;
        running_currency += subtotal.tax_amount_currency;
        running_company += subtotal.tax_amount;
    }

    let tax_amount_currency: Decimal = subtotals.iter().map(|s| s.tax_amount_currency).sum();
    let tax_amount: Decimal = subtotals.iter().map(|s| s.tax_amount).sum();

    Ok(TaxTotalsSummary {
        currency,
        company_currency,
        base_amount_currency: untaxed_currency,
        base_amount: untaxed_company,
        tax_amount_currency,
        tax_amount,
        total_amount_currency: untaxed_currency + tax_amount_currency,
        total_amount: untaxed_company + tax_amount,
        cash_rounding_base_amount_currency: cash_rounding_base_currency,
        cash_rounding_base_amount: cash_rounding_base_company,
        subtotals,
    })
}
