//! Per-line tax detail computation.
//!
//! For one base line, the engine flattens and batches the taxes, resolves
//! every tax amount in a fixed evaluation order (fixed taxes first, then
//! price-included batches walking the sequence backwards, then
//! price-excluded batches walking forwards), propagates extra-base
//! contributions between taxes, and emits one raw [`TaxData`] entry per
//! applied tax — plus a mirrored negative entry for reverse-charge taxes.
//! Amounts are produced in document currency and company currency; the two
//! legs round independently later.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::base_line::{BaseLine, SpecialMode};
use crate::rounding::{RoundingMethod, round_to_precision};
use crate::tax::{
    AmountType, FlatTax, SteuerError, Tax, TaxBatch, TaxId, flatten_and_batch, validate_taxes,
};

/// A numeric guard that fired during computation. Recovered locally, never
/// an error; surfaced so a tax misconfiguration stays observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComputationWarning {
    /// A rate-based batch reached a combined rate whose divisor is exactly
    /// zero (100 % for division-type, −100 % for price-included percent);
    /// the divisor was clamped to 1 instead of dividing by zero.
    DivisionRateClamped {
        taxes: Vec<TaxId>,
        total_rate: Decimal,
    },
}

/// Computed amounts for one applied tax on one base line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxData {
    pub tax: Tax,
    /// Owning group of taxes, when the tax was expanded from one.
    pub group: Option<TaxId>,
    /// Ordinal of the batch the tax was evaluated in.
    pub batch: usize,
    /// Effective price inclusion used for the evaluation.
    pub price_include: bool,
    /// Mirrored negative entry of a tax with negative repartition factors.
    pub is_reverse_charge: bool,
    pub raw_base_amount_currency: Decimal,
    pub raw_base_amount: Decimal,
    pub raw_tax_amount_currency: Decimal,
    pub raw_tax_amount: Decimal,
    /// Rounded amounts; start as the per-line rounding of the raw values and
    /// are refined by the rounding pass.
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
}

/// All tax amounts computed for one base line, in both currency legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxDetails {
    pub raw_total_excluded_currency: Decimal,
    pub raw_total_excluded: Decimal,
    pub raw_total_included_currency: Decimal,
    pub raw_total_included: Decimal,
    /// Rounded totals; refined by the rounding pass.
    pub total_excluded_currency: Decimal,
    pub total_excluded: Decimal,
    pub total_included_currency: Decimal,
    pub total_included: Decimal,
    /// One entry per applied tax, in application order, with reverse-charge
    /// mirrors directly after their positive counterpart.
    pub taxes_data: Vec<TaxData>,
    pub warnings: Vec<ComputationWarning>,
}

impl TaxDetails {
    /// Recompute the rounded included totals from the rounded excluded
    /// totals and tax amounts, per currency leg.
    pub(crate) fn refresh_included(&mut self) {
        self.total_included_currency = self.total_excluded_currency
            + self
                .taxes_data
                .iter()
                .map(|data| data.tax_amount_currency)
                .sum::<Decimal>();
        self.total_included = self.total_excluded
            + self.taxes_data.iter().map(|data| data.tax_amount).sum::<Decimal>();
    }
}

/// Compute and attach [`TaxDetails`] to every base line.
///
/// The tax configuration of all lines is validated first; on failure no line
/// is touched. Computation itself cannot fail: numeric guards are recorded
/// as [`ComputationWarning`]s on the affected line.
pub fn add_tax_details(base_lines: &mut [BaseLine]) -> Result<(), SteuerError> {
    let mut messages: Vec<String> = Vec::new();
    for line in base_lines.iter() {
        for error in validate_taxes(&line.taxes) {
            let message = error.to_string();
            if !messages.contains(&message) {
                messages.push(message);
            }
        }
    }
    if !messages.is_empty() {
        return Err(SteuerError::Configuration(messages.join("; ")));
    }

    for line in base_lines.iter_mut() {
        line.tax_details = Some(compute_line_details(line));
    }
    Ok(())
}

/// Signed extra-base contributions registered on one tax.
#[derive(Debug, Default, Clone)]
struct ExtraBase {
    /// Contributions applied when computing the tax's own amount.
    for_tax: Vec<(Decimal, usize)>,
    /// Contributions applied when computing the tax's reported base.
    for_base: Vec<(Decimal, usize)>,
}

struct EvalPlan {
    /// Batch indices in evaluation order.
    order: Vec<usize>,
    extra: Vec<ExtraBase>,
}

fn build_eval_plan(flat: &[FlatTax], batches: &[TaxBatch], mode: SpecialMode) -> EvalPlan {
    let mut order: Vec<usize> = Vec::with_capacity(batches.len());
    for index in (0..batches.len()).rev() {
        if batches[index].amount_type == AmountType::Fixed {
            order.push(index);
        }
    }
    for index in (0..batches.len()).rev() {
        let batch = &batches[index];
        if batch.amount_type != AmountType::Fixed && batch.price_include {
            order.push(index);
        }
    }
    for (index, batch) in batches.iter().enumerate() {
        if batch.amount_type != AmountType::Fixed && !batch.price_include {
            order.push(index);
        }
    }

    let mut extra = vec![ExtraBase::default(); flat.len()];
    let mut evaluated = vec![false; batches.len()];

    for &batch_index in &order {
        let batch = &batches[batch_index];
        let (sign, targets) = propagation_targets(flat, batches, batch_index, mode);
        for &target in &targets {
            let target_batch = flat[target].batch;
            for &source in &batch.tax_indexes {
                extra[target].for_base.push((sign, source));
                if target_batch != batch_index && !evaluated[target_batch] {
                    extra[target].for_tax.push((sign, source));
                }
            }
        }
        evaluated[batch_index] = true;
    }

    EvalPlan { order, extra }
}

/// Flat indices whose base is shifted by the given batch, with the sign of
/// the shift. Four cases, driven by price inclusion and the special mode:
///
/// - price-included, normal or total-included price: the batch amounts are
///   contained in the raw base, so they are removed from every other tax's
///   base — except later base-affected taxes when the batch feeds subsequent
///   bases (their base *is* the tax-included price).
/// - price-included, total-excluded price: the caller already removed the
///   amounts once; they are added back for later base-affected taxes when
///   the batch feeds subsequent bases.
/// - price-excluded, normal or total-excluded price: amounts are added to
///   later base-affected taxes when the batch feeds subsequent bases.
/// - price-excluded, total-included price: the caller's price contains the
///   amounts, so they are removed from every tax's base symmetrically.
fn propagation_targets(
    flat: &[FlatTax],
    batches: &[TaxBatch],
    batch_index: usize,
    mode: SpecialMode,
) -> (Decimal, Vec<usize>) {
    let batch = &batches[batch_index];
    let mut targets = Vec::new();

    let subsequent = |targets: &mut Vec<usize>, only_base_affected: bool| {
        for later in batches.iter().skip(batch_index + 1) {
            for &index in &later.tax_indexes {
                if !only_base_affected || flat[index].tax.is_base_affected {
                    targets.push(index);
                }
            }
        }
    };
    let prior_and_own = |targets: &mut Vec<usize>| {
        for earlier in batches.iter().take(batch_index) {
            targets.extend(earlier.tax_indexes.iter().copied());
        }
        targets.extend(batch.tax_indexes.iter().copied());
    };

    match (batch.price_include, mode) {
        (true, SpecialMode::None | SpecialMode::TotalIncluded) => {
            if batch.include_base_amount {
                // Later base-affected taxes keep the amount in their base.
                for later in batches.iter().skip(batch_index + 1) {
                    for &index in &later.tax_indexes {
                        if !flat[index].tax.is_base_affected {
                            targets.push(index);
                        }
                    }
                }
            } else {
                subsequent(&mut targets, false);
            }
            prior_and_own(&mut targets);
            (dec!(-1), targets)
        }
        (true, SpecialMode::TotalExcluded) if batch.include_base_amount => {
            subsequent(&mut targets, true);
            (Decimal::ONE, targets)
        }
        (false, SpecialMode::None | SpecialMode::TotalExcluded) if batch.include_base_amount => {
            subsequent(&mut targets, true);
            (Decimal::ONE, targets)
        }
        (false, SpecialMode::TotalIncluded) if !batch.include_base_amount => {
            subsequent(&mut targets, false);
            prior_and_own(&mut targets);
            (dec!(-1), targets)
        }
        _ => (Decimal::ZERO, targets),
    }
}

/// Whether the batch evaluates with the tax-included formula (the base fed
/// to it still contains the batch amounts).
fn included_style(price_include: bool, mode: SpecialMode) -> bool {
    (price_include && mode != SpecialMode::TotalExcluded)
        || (!price_include && mode == SpecialMode::TotalIncluded)
}

fn eval_tax_amount(
    entry: &FlatTax,
    batch: &TaxBatch,
    base: Decimal,
    line: &BaseLine,
    clamped: &mut Vec<usize>,
    batch_index: usize,
) -> Decimal {
    let tax = &entry.tax;
    match tax.amount_type {
        AmountType::Fixed => {
            let amount = if line.price_unit.is_sign_negative() {
                -tax.amount
            } else {
                tax.amount
            };
            line.quantity * amount
        }
        AmountType::Percent => {
            let rate = tax.amount / dec!(100);
            if included_style(batch.price_include, line.special_mode) {
                let divisor = Decimal::ONE + batch.total_rate / dec!(100);
                if divisor.is_zero() {
                    if !clamped.contains(&batch_index) {
                        clamped.push(batch_index);
                    }
                    base * rate
                } else {
                    base * rate / divisor
                }
            } else {
                base * rate
            }
        }
        AmountType::Division => {
            let rate = tax.amount / dec!(100);
            if included_style(batch.price_include, line.special_mode) {
                base * rate
            } else {
                let divisor = Decimal::ONE - batch.total_rate / dec!(100);
                if divisor.is_zero() {
                    if !clamped.contains(&batch_index) {
                        clamped.push(batch_index);
                    }
                    base * rate
                } else {
                    base * rate / divisor
                }
            }
        }
        // Groups never survive flattening.
        AmountType::Group => Decimal::ZERO,
    }
}

fn compute_line_details(line: &BaseLine) -> TaxDetails {
    let document_type = line.document_type();
    let (flat, batches) = flatten_and_batch(&line.taxes, document_type);
    let plan = build_eval_plan(&flat, &batches, line.special_mode);

    let raw_base = line.raw_base();
    let mut factorized = vec![Decimal::ZERO; flat.len()];
    let mut unit_amounts = vec![Decimal::ZERO; flat.len()];
    let mut clamped_batches: Vec<usize> = Vec::new();

    for &batch_index in &plan.order {
        let batch = &batches[batch_index];
        for &tax_index in &batch.tax_indexes {
            let extra: Decimal = plan.extra[tax_index]
                .for_tax
                .iter()
                .map(|&(sign, source)| sign * factorized[source])
                .sum();
            let amount = eval_tax_amount(
                &flat[tax_index],
                batch,
                raw_base + extra,
                line,
                &mut clamped_batches,
                batch_index,
            );
            unit_amounts[tax_index] = amount;
            factorized[tax_index] = amount * flat[tax_index].factor;
        }
    }

    let bases: Vec<Decimal> = (0..flat.len())
        .map(|index| {
            raw_base
                + plan.extra[index]
                    .for_base
                    .iter()
                    .map(|&(sign, source)| sign * factorized[source])
                    .sum::<Decimal>()
        })
        .collect();

    let warnings = clamped_batches
        .iter()
        .map(|&batch_index| ComputationWarning::DivisionRateClamped {
            taxes: batches[batch_index]
                .tax_indexes
                .iter()
                .map(|&index| flat[index].tax.id)
                .collect(),
            total_rate: batches[batch_index].total_rate,
        })
        .collect::<Vec<_>>();
    for warning in &warnings {
        if let ComputationWarning::DivisionRateClamped { taxes, total_rate } = warning {
            tracing::warn!(
                ?taxes,
                %total_rate,
                "rate-based tax batch reached a zero divisor; clamped to 1"
            );
        }
    }

    let currency_step = line.currency.rounding;
    let company_step = line.company_currency.rounding;
    let round_currency = |value: Decimal| round_to_precision(value, currency_step, RoundingMethod::HalfUp);
    let round_company = |value: Decimal| round_to_precision(value, company_step, RoundingMethod::HalfUp);

    // The company leg follows the rounded document-currency amounts: what
    // gets converted is the amount the document actually shows.
    let mut taxes_data = Vec::with_capacity(flat.len());
    for (index, entry) in flat.iter().enumerate() {
        let base_currency = bases[index];
        let base_company = line.to_company(base_currency);
        let tax_currency = factorized[index];
        let tax_company = line.to_company(tax_currency);
        let base_currency_rounded = round_currency(base_currency);
        let tax_currency_rounded = round_currency(tax_currency);
        taxes_data.push(TaxData {
            tax: entry.tax.clone(),
            group: entry.group,
            batch: entry.batch,
            price_include: entry.tax.price_include,
            is_reverse_charge: false,
            raw_base_amount_currency: base_currency,
            raw_base_amount: base_company,
            raw_tax_amount_currency: tax_currency,
            raw_tax_amount: tax_company,
            base_amount_currency: base_currency_rounded,
            base_amount: round_company(line.to_company(base_currency_rounded)),
            tax_amount_currency: tax_currency_rounded,
            tax_amount: round_company(line.to_company(tax_currency_rounded)),
        });
        if !entry.negative_factor.is_zero() {
            let mirror_currency = unit_amounts[index] * entry.negative_factor;
            let mirror_company = line.to_company(mirror_currency);
            let mirror_currency_rounded = round_currency(mirror_currency);
            taxes_data.push(TaxData {
                tax: entry.tax.clone(),
                group: entry.group,
                batch: entry.batch,
                price_include: entry.tax.price_include,
                is_reverse_charge: true,
                raw_base_amount_currency: base_currency,
                raw_base_amount: base_company,
                raw_tax_amount_currency: mirror_currency,
                raw_tax_amount: mirror_company,
                base_amount_currency: base_currency_rounded,
                base_amount: round_company(line.to_company(base_currency_rounded)),
                tax_amount_currency: mirror_currency_rounded,
                tax_amount: round_company(line.to_company(mirror_currency_rounded)),
            });
        }
    }

    let raw_total_excluded_currency = bases.first().copied().unwrap_or(raw_base);
    let raw_total_excluded = line.to_company(raw_total_excluded_currency);
    let raw_total_included_currency = raw_total_excluded_currency
        + taxes_data
            .iter()
            .map(|data| data.raw_tax_amount_currency)
            .sum::<Decimal>();
    let raw_total_included = line.to_company(raw_total_included_currency);

    let total_excluded_currency = round_currency(raw_total_excluded_currency);
    let mut details = TaxDetails {
        raw_total_excluded_currency,
        raw_total_excluded,
        raw_total_included_currency,
        raw_total_included,
        total_excluded_currency,
        total_excluded: round_company(line.to_company(total_excluded_currency)),
        total_included_currency: Decimal::ZERO,
        total_included: Decimal::ZERO,
        taxes_data,
        warnings,
    };
    details.refresh_included();
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::BaseLineBuilder;
    use crate::tax::{RepartitionLine, RepartitionType, TaxBuilder};

    fn details_for(price_unit: Decimal, quantity: Decimal, taxes: Vec<Tax>) -> TaxDetails {
        let mut lines = [BaseLineBuilder::new(price_unit, quantity).taxes(taxes).build()];
        add_tax_details(&mut lines).unwrap();
        lines[0].tax_details.take().unwrap()
    }

    #[test]
    fn price_include_equivalence() {
        let included = TaxBuilder::percent(1, "21% incl", dec!(21))
            .price_include(true)
            .build_unchecked();
        let details = details_for(dec!(121), dec!(1), vec![included]);
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(21));
        assert_eq!(details.raw_total_included_currency, dec!(121));

        let excluded = TaxBuilder::percent(1, "21%", dec!(21)).build_unchecked();
        let details = details_for(dec!(100), dec!(1), vec![excluded]);
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(21));
        assert_eq!(details.raw_total_included_currency, dec!(121));
    }

    #[test]
    fn stacked_price_included_batch_symmetry() {
        let tax1 = TaxBuilder::percent(1, "10% incl", dec!(10))
            .price_include(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "10% incl bis", dec!(10))
            .price_include(true)
            .sequence(2)
            .build_unchecked();
        let details = details_for(dec!(120), dec!(1), vec![tax1, tax2]);
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(10));
        assert_eq!(details.taxes_data[1].raw_tax_amount_currency, dec!(10));
        assert_eq!(details.taxes_data[0].raw_base_amount_currency, dec!(100));
    }

    #[test]
    fn fixed_tax_feeds_subsequent_base() {
        let fix = TaxBuilder::fixed(1, "fix 1.0", dec!(1))
            .include_base_amount(true)
            .sequence(1)
            .build_unchecked();
        let vat = TaxBuilder::percent(2, "21%", dec!(21))
            .sequence(2)
            .build_unchecked();
        let details = details_for(dec!(16.79), dec!(1), vec![fix, vat]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(1));
        assert_eq!(details.taxes_data[1].raw_base_amount_currency, dec!(17.79));
        assert_eq!(details.taxes_data[1].raw_tax_amount_currency, dec!(3.7359));
        assert_eq!(details.raw_total_excluded_currency, dec!(16.79));
    }

    #[test]
    fn base_affecting_chain_skips_unaffected_member() {
        let tax1 = TaxBuilder::percent(1, "6% a", dec!(6))
            .include_base_amount(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "6% b", dec!(6))
            .include_base_amount(true)
            .is_base_affected(false)
            .sequence(2)
            .build_unchecked();
        let tax3 = TaxBuilder::percent(3, "3%", dec!(3))
            .sequence(3)
            .build_unchecked();
        let details = details_for(dec!(15.89), dec!(1), vec![tax1, tax2, tax3]);
        assert_eq!(details.taxes_data[0].raw_base_amount_currency, dec!(15.89));
        assert_eq!(details.taxes_data[1].raw_base_amount_currency, dec!(15.89));
        assert_eq!(details.taxes_data[2].raw_base_amount_currency, dec!(17.7968));
        assert_eq!(details.taxes_data[2].raw_tax_amount_currency, dec!(0.533904));
    }

    #[test]
    fn price_included_with_base_feed_keeps_amount_for_affected() {
        let tax1 = TaxBuilder::percent(1, "10% incl", dec!(10))
            .price_include(true)
            .include_base_amount(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "5%", dec!(5))
            .sequence(2)
            .build_unchecked();
        let details = details_for(dec!(110), dec!(1), vec![tax1, tax2]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(10));
        assert_eq!(details.taxes_data[0].raw_base_amount_currency, dec!(100));
        // The 5% tax is base-affected: its base is the tax-included 110.
        assert_eq!(details.taxes_data[1].raw_base_amount_currency, dec!(110));
        assert_eq!(details.taxes_data[1].raw_tax_amount_currency, dec!(5.50));
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.raw_total_included_currency, dec!(115.50));
    }

    #[test]
    fn division_price_included() {
        let tax = TaxBuilder::division(1, "10% div incl", dec!(10))
            .price_include(true)
            .build_unchecked();
        let details = details_for(dec!(200), dec!(1), vec![tax]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(20));
        assert_eq!(details.raw_total_excluded_currency, dec!(180));
    }

    #[test]
    fn division_price_excluded() {
        let tax = TaxBuilder::division(1, "10% div", dec!(10)).build_unchecked();
        let details = details_for(dec!(180), dec!(1), vec![tax]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(20));
        assert_eq!(details.raw_total_included_currency, dec!(200));
    }

    #[test]
    fn division_batch_at_hundred_percent_is_clamped() {
        let tax = TaxBuilder::division(1, "100% div", dec!(100)).build_unchecked();
        let details = details_for(dec!(50), dec!(1), vec![tax]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(50));
        assert!(matches!(
            details.warnings.as_slice(),
            [ComputationWarning::DivisionRateClamped { total_rate, .. }] if *total_rate == dec!(100)
        ));
    }

    #[test]
    fn total_included_mode_strips_excluded_taxes() {
        let tax = TaxBuilder::percent(1, "21%", dec!(21)).build_unchecked();
        let mut lines = [BaseLineBuilder::new(dec!(121), dec!(1))
            .taxes(vec![tax])
            .special_mode(SpecialMode::TotalIncluded)
            .build()];
        add_tax_details(&mut lines).unwrap();
        let details = lines[0].tax_details.as_ref().unwrap();
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(21));
        assert_eq!(details.taxes_data[0].raw_base_amount_currency, dec!(100));
    }

    #[test]
    fn total_excluded_mode_treats_included_taxes_as_excluded() {
        let tax = TaxBuilder::percent(1, "21% incl", dec!(21))
            .price_include(true)
            .build_unchecked();
        let mut lines = [BaseLineBuilder::new(dec!(100), dec!(1))
            .taxes(vec![tax])
            .special_mode(SpecialMode::TotalExcluded)
            .build()];
        add_tax_details(&mut lines).unwrap();
        let details = lines[0].tax_details.as_ref().unwrap();
        assert_eq!(details.raw_total_excluded_currency, dec!(100));
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(21));
        assert_eq!(details.raw_total_included_currency, dec!(121));
    }

    #[test]
    fn reverse_charge_nets_to_zero() {
        let lines_for = |base: u32| {
            vec![
                RepartitionLine::new(base, RepartitionType::Base, dec!(1)),
                RepartitionLine::new(base + 1, RepartitionType::Tax, dec!(1)),
                RepartitionLine::new(base + 2, RepartitionType::Tax, dec!(-1)),
            ]
        };
        let tax = TaxBuilder::percent(1, "RC 21%", dec!(21))
            .repartition(lines_for(1), lines_for(4))
            .build_unchecked();
        let details = details_for(dec!(100), dec!(1), vec![tax]);
        assert_eq!(details.taxes_data.len(), 2);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(21));
        assert!(details.taxes_data[1].is_reverse_charge);
        assert_eq!(details.taxes_data[1].raw_tax_amount_currency, dec!(-21));
        assert_eq!(details.taxes_data[1].raw_base_amount_currency, dec!(100));
        assert_eq!(details.raw_total_included_currency, dec!(100));
    }

    #[test]
    fn zero_quantity_still_emits_entries() {
        let tax = TaxBuilder::percent(1, "19%", dec!(19)).build_unchecked();
        let details = details_for(dec!(100), dec!(0), vec![tax]);
        assert_eq!(details.taxes_data.len(), 1);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(0));
        assert_eq!(details.raw_total_included_currency, dec!(0));
    }

    #[test]
    fn negative_price_flips_fixed_tax() {
        let fix = TaxBuilder::fixed(1, "fix 2", dec!(2)).build_unchecked();
        let details = details_for(dec!(-50), dec!(3), vec![fix]);
        assert_eq!(details.taxes_data[0].raw_tax_amount_currency, dec!(-6));
        assert_eq!(details.raw_total_included_currency, dec!(-156));
    }

    #[test]
    fn company_leg_divides_by_rate() {
        let tax = TaxBuilder::percent(1, "6%", dec!(6)).build_unchecked();
        let mut lines = [BaseLineBuilder::new(dec!(15.89), dec!(1))
            .taxes(vec![tax])
            .rate(dec!(5))
            .build()];
        add_tax_details(&mut lines).unwrap();
        let details = lines[0].tax_details.as_ref().unwrap();
        assert_eq!(details.raw_total_excluded, dec!(3.178));
        assert_eq!(details.taxes_data[0].raw_tax_amount, dec!(0.19068));
        assert_eq!(details.taxes_data[0].tax_amount, dec!(0.19));
    }

    #[test]
    fn configuration_error_leaves_lines_untouched() {
        let bad = TaxBuilder::percent(1, "broken", dec!(19))
            .repartition(
                vec![RepartitionLine::new(1, RepartitionType::Tax, dec!(0.5))],
                vec![RepartitionLine::new(2, RepartitionType::Tax, dec!(0.5))],
            )
            .build_unchecked();
        let good = TaxBuilder::percent(2, "19%", dec!(19)).build_unchecked();
        let mut lines = [
            BaseLineBuilder::new(dec!(10), dec!(1)).taxes(vec![good]).build(),
            BaseLineBuilder::new(dec!(10), dec!(1)).taxes(vec![bad]).build(),
        ];
        let result = add_tax_details(&mut lines);
        assert!(matches!(result, Err(SteuerError::Configuration(_))));
        assert!(lines[0].tax_details.is_none());
        assert!(lines[1].tax_details.is_none());
    }
}
