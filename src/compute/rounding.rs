//! Rounding and delta distribution.
//!
//! Two strategies. `PerLine` rounds every amount to currency precision per
//! line and is done. `Globally` keeps the per-line rounded amounts as a
//! starting point, sums the *raw* amounts per `(tax, reverse-charge)` group
//! across the whole document, rounds each aggregate once, and pushes the
//! difference back onto the contributing entries with
//! [`dispatch_delta_smoothly`]. Document and company currency reconcile
//! independently — their roundings are not proportional to each other.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::base_line::BaseLine;
use super::details::TaxData;
use crate::rounding::{RoundingMethod, round_to_precision};
use crate::tax::{SteuerError, TaxId};

/// Which quantity a document reconciles on under global rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Anchor {
    /// Reconcile the sum of excluded totals.
    Excluded,
    /// Reconcile the sum of included totals (the quoted, tax-included
    /// price stays fixed; rounding residue moves into the base).
    Included,
    /// Per line: `Included` when any tax on the line is price-included,
    /// else `Excluded`.
    #[default]
    Mixed,
}

/// Rounding strategy for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Round every amount per line; no cross-line reconciliation.
    PerLine,
    /// Round aggregates once across all lines and redistribute the deltas.
    Globally(Anchor),
}

#[derive(Clone, Copy)]
enum Leg {
    Currency,
    Company,
}

fn raw_tax(data: &TaxData, leg: Leg) -> Decimal {
    match leg {
        Leg::Currency => data.raw_tax_amount_currency,
        Leg::Company => data.raw_tax_amount,
    }
}

fn raw_base(data: &TaxData, leg: Leg) -> Decimal {
    match leg {
        Leg::Currency => data.raw_base_amount_currency,
        Leg::Company => data.raw_base_amount,
    }
}

fn rounded_tax_mut(data: &mut TaxData, leg: Leg) -> &mut Decimal {
    match leg {
        Leg::Currency => &mut data.tax_amount_currency,
        Leg::Company => &mut data.tax_amount,
    }
}

fn rounded_base_mut(data: &mut TaxData, leg: Leg) -> &mut Decimal {
    match leg {
        Leg::Currency => &mut data.base_amount_currency,
        Leg::Company => &mut data.base_amount,
    }
}

fn precision(line: &BaseLine, leg: Leg) -> Decimal {
    match leg {
        Leg::Currency => line.currency.rounding,
        Leg::Company => line.company_currency.rounding,
    }
}

/// Distribute `delta` over `targets` in steps of `precision`, proportionally
/// to the absolute weights.
///
/// The weights are normalized to fractions of their sum (ties broken by the
/// larger weight first, then input order), `delta / precision` becomes an
/// integer count of units, each target gets `round(fraction × count)` units
/// capped by the remaining budget, and any leftover units land one by one
/// on the highest-weighted targets. Guarantees: the allocations sum to
/// `delta` exactly, no allocation's sign disagrees with `delta`'s, and the
/// result is deterministic for identical inputs. With no targets the delta
/// is not distributed at all — callers needing strict reconciliation must
/// compare the allocated sum themselves.
pub fn dispatch_delta_smoothly(
    delta: Decimal,
    precision: Decimal,
    targets: &[(usize, Decimal)],
) -> Vec<(usize, Decimal)> {
    if delta.is_zero() || precision <= Decimal::ZERO {
        return Vec::new();
    }
    if targets.is_empty() {
        tracing::warn!(%delta, "rounding delta has no targets to distribute onto");
        return Vec::new();
    }
    let Some(units) = (delta / precision)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
    else {
        return Vec::new();
    };
    if units == 0 {
        return Vec::new();
    }
    let sign = if units < 0 { dec!(-1) } else { Decimal::ONE };
    let mut remaining = units.abs();
    let units_total = Decimal::from(remaining);

    let mut order: Vec<(usize, Decimal)> = targets
        .iter()
        .enumerate()
        .map(|(position, &(_, weight))| (position, weight.abs()))
        .collect();
    let total_weight: Decimal = order.iter().map(|&(_, weight)| weight).sum();
    if total_weight.is_zero() {
        for entry in &mut order {
            entry.1 = Decimal::ONE;
        }
    }
    let total_weight = order.iter().map(|&(_, weight)| weight).sum::<Decimal>();
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut counts = vec![0i64; targets.len()];
    for &(position, weight) in &order {
        let share = (weight / total_weight * units_total)
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(0)
            .clamp(0, remaining);
        counts[position] = share;
        remaining -= share;
    }
    while remaining > 0 {
        for &(position, _) in &order {
            counts[position] += 1;
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
    }

    targets
        .iter()
        .enumerate()
        .filter(|&(position, _)| counts[position] != 0)
        .map(|(position, &(index, _))| (index, sign * Decimal::from(counts[position]) * precision))
        .collect()
}

/// Round the tax details of a document in place.
///
/// Rounded values are always rebuilt from the raw amounts, so re-running the
/// pass (with any mode) yields identical results. Fails when a line never
/// went through [`add_tax_details`](super::add_tax_details).
pub fn round_tax_details(base_lines: &mut [BaseLine], mode: RoundingMode) -> Result<(), SteuerError> {
    for (index, line) in base_lines.iter().enumerate() {
        if line.tax_details.is_none() {
            return Err(SteuerError::MissingTaxDetails(format!(
                "base line {index} has no computed tax details to round"
            )));
        }
    }

    // Per-line rounding is the starting point of both modes. The company
    // leg converts the rounded document-currency amounts.
    for line in base_lines.iter_mut() {
        let currency_step = line.currency.rounding;
        let company_step = line.company_currency.rounding;
        let rate = line.rate;
        let to_company = |amount: Decimal| {
            if rate.is_zero() { Decimal::ZERO } else { amount / rate }
        };
        let details = line.tax_details.as_mut().unwrap();
        details.total_excluded_currency = round_to_precision(
            details.raw_total_excluded_currency,
            currency_step,
            RoundingMethod::HalfUp,
        );
        details.total_excluded = round_to_precision(
            to_company(details.total_excluded_currency),
            company_step,
            RoundingMethod::HalfUp,
        );
        for data in &mut details.taxes_data {
            data.tax_amount_currency =
                round_to_precision(data.raw_tax_amount_currency, currency_step, RoundingMethod::HalfUp);
            data.tax_amount = round_to_precision(
                to_company(data.tax_amount_currency),
                company_step,
                RoundingMethod::HalfUp,
            );
            data.base_amount_currency =
                round_to_precision(data.raw_base_amount_currency, currency_step, RoundingMethod::HalfUp);
            data.base_amount = round_to_precision(
                to_company(data.base_amount_currency),
                company_step,
                RoundingMethod::HalfUp,
            );
        }
    }

    if let RoundingMode::Globally(anchor) = mode {
        reconcile_globally(base_lines, anchor);
    }

    for line in base_lines.iter_mut() {
        line.tax_details.as_mut().unwrap().refresh_included();
    }
    Ok(())
}

fn reconcile_globally(base_lines: &mut [BaseLine], anchor: Anchor) {
    // Aggregate per tax (reverse-charge mirrors reconcile on their own so
    // that the pair keeps netting to zero exactly).
    let mut groups: BTreeMap<(TaxId, bool), Vec<(usize, usize)>> = BTreeMap::new();
    for (line_index, line) in base_lines.iter().enumerate() {
        let details = line.tax_details.as_ref().unwrap();
        for (entry_index, data) in details.taxes_data.iter().enumerate() {
            groups
                .entry((data.tax.id, data.is_reverse_charge))
                .or_default()
                .push((line_index, entry_index));
        }
    }

    for leg in [Leg::Currency, Leg::Company] {
        for entries in groups.values() {
            let step = precision(&base_lines[entries[0].0], leg);

            // Tax amounts, weighted by each entry's own raw amount.
            let raw_sum: Decimal = entries
                .iter()
                .map(|&(li, ei)| raw_tax(&base_lines[li].tax_details.as_ref().unwrap().taxes_data[ei], leg))
                .sum();
            let current: Decimal = entries
                .iter()
                .map(|&(li, ei)| {
                    let data = &base_lines[li].tax_details.as_ref().unwrap().taxes_data[ei];
                    match leg {
                        Leg::Currency => data.tax_amount_currency,
                        Leg::Company => data.tax_amount,
                    }
                })
                .sum();
            let delta = round_to_precision(raw_sum, step, RoundingMethod::HalfUp) - current;
            let weights: Vec<(usize, Decimal)> = entries
                .iter()
                .enumerate()
                .map(|(position, &(li, ei))| {
                    (position, raw_tax(&base_lines[li].tax_details.as_ref().unwrap().taxes_data[ei], leg))
                })
                .collect();
            for (position, amount) in dispatch_delta_smoothly(delta, step, &weights) {
                let (li, ei) = entries[position];
                *rounded_tax_mut(&mut base_lines[li].tax_details.as_mut().unwrap().taxes_data[ei], leg) += amount;
            }

            // Tax bases, weighted by each line's raw excluded total.
            let raw_sum: Decimal = entries
                .iter()
                .map(|&(li, ei)| raw_base(&base_lines[li].tax_details.as_ref().unwrap().taxes_data[ei], leg))
                .sum();
            let current: Decimal = entries
                .iter()
                .map(|&(li, ei)| {
                    let data = &base_lines[li].tax_details.as_ref().unwrap().taxes_data[ei];
                    match leg {
                        Leg::Currency => data.base_amount_currency,
                        Leg::Company => data.base_amount,
                    }
                })
                .sum();
            let delta = round_to_precision(raw_sum, step, RoundingMethod::HalfUp) - current;
            let weights: Vec<(usize, Decimal)> = entries
                .iter()
                .enumerate()
                .map(|(position, &(li, _))| (position, line_raw_excluded(&base_lines[li], leg)))
                .collect();
            for (position, amount) in dispatch_delta_smoothly(delta, step, &weights) {
                let (li, ei) = entries[position];
                *rounded_base_mut(&mut base_lines[li].tax_details.as_mut().unwrap().taxes_data[ei], leg) += amount;
            }
        }

        // Document base, reconciled per anchor partition.
        let mut excluded_lines = Vec::new();
        let mut included_lines = Vec::new();
        for (line_index, line) in base_lines.iter().enumerate() {
            let line_anchor = match anchor {
                Anchor::Excluded => Anchor::Excluded,
                Anchor::Included => Anchor::Included,
                Anchor::Mixed => {
                    let any_included = line
                        .tax_details
                        .as_ref()
                        .unwrap()
                        .taxes_data
                        .iter()
                        .any(|data| data.price_include);
                    if any_included { Anchor::Included } else { Anchor::Excluded }
                }
            };
            if line_anchor == Anchor::Included {
                included_lines.push(line_index);
            } else {
                excluded_lines.push(line_index);
            }
        }

        if !excluded_lines.is_empty() {
            let step = precision(&base_lines[excluded_lines[0]], leg);
            let raw_sum: Decimal = excluded_lines
                .iter()
                .map(|&li| line_raw_excluded(&base_lines[li], leg))
                .sum();
            let current: Decimal = excluded_lines
                .iter()
                .map(|&li| line_rounded_excluded(&base_lines[li], leg))
                .sum();
            let delta = round_to_precision(raw_sum, step, RoundingMethod::HalfUp) - current;
            distribute_on_excluded(base_lines, &excluded_lines, delta, step, leg);
        }

        if !included_lines.is_empty() {
            let step = precision(&base_lines[included_lines[0]], leg);
            let raw_sum: Decimal = included_lines
                .iter()
                .map(|&li| match leg {
                    Leg::Currency => base_lines[li].tax_details.as_ref().unwrap().raw_total_included_currency,
                    Leg::Company => base_lines[li].tax_details.as_ref().unwrap().raw_total_included,
                })
                .sum();
            let current: Decimal = included_lines
                .iter()
                .map(|&li| {
                    let details = base_lines[li].tax_details.as_ref().unwrap();
                    line_rounded_excluded(&base_lines[li], leg)
                        + details
                            .taxes_data
                            .iter()
                            .map(|data| match leg {
                                Leg::Currency => data.tax_amount_currency,
                                Leg::Company => data.tax_amount,
                            })
                            .sum::<Decimal>()
                })
                .sum();
            let delta = round_to_precision(raw_sum, step, RoundingMethod::HalfUp) - current;
            distribute_on_excluded(base_lines, &included_lines, delta, step, leg);
        }
    }
}

fn line_raw_excluded(line: &BaseLine, leg: Leg) -> Decimal {
    let details = line.tax_details.as_ref().unwrap();
    match leg {
        Leg::Currency => details.raw_total_excluded_currency,
        Leg::Company => details.raw_total_excluded,
    }
}

fn line_rounded_excluded(line: &BaseLine, leg: Leg) -> Decimal {
    let details = line.tax_details.as_ref().unwrap();
    match leg {
        Leg::Currency => details.total_excluded_currency,
        Leg::Company => details.total_excluded,
    }
}

fn distribute_on_excluded(
    base_lines: &mut [BaseLine],
    line_indices: &[usize],
    delta: Decimal,
    step: Decimal,
    leg: Leg,
) {
    let weights: Vec<(usize, Decimal)> = line_indices
        .iter()
        .enumerate()
        .map(|(position, &li)| (position, line_raw_excluded(&base_lines[li], leg)))
        .collect();
    for (position, amount) in dispatch_delta_smoothly(delta, step, &weights) {
        let details = base_lines[line_indices[position]].tax_details.as_mut().unwrap();
        match leg {
            Leg::Currency => details.total_excluded_currency += amount,
            Leg::Company => details.total_excluded += amount,
        }
    }
}
