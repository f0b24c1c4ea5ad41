use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::compute::{BaseLine, dispatch_delta_smoothly};
use crate::rounding::{RoundingMethod, round_to_precision};
use crate::tax::{
    AccountId, PartnerId, RepartitionLineId, RepartitionType, SteuerError, TagId, TaxId,
};

/// Composite key an accounting tax line aggregates on. Two computed amounts
/// with equal keys merge into one posting; the key is also what existing
/// lines are matched against when diffing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupingKey {
    pub repartition_line: RepartitionLineId,
    pub partner: Option<PartnerId>,
    /// ISO code of the document currency.
    pub currency: String,
    pub account: Option<AccountId>,
    pub tags: BTreeSet<TagId>,
    pub analytic_distribution: BTreeMap<AccountId, Decimal>,
}

/// One aggregated accounting tax line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub key: GroupingKey,
    pub tax: TaxId,
    pub use_in_tax_closing: bool,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
}

/// A previously persisted tax line, identified for the three-way diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingTaxLine {
    pub id: u64,
    pub key: GroupingKey,
    pub tax_amount_currency: Decimal,
    pub tax_amount: Decimal,
    pub base_amount_currency: Decimal,
    pub base_amount: Decimal,
}

/// Rounded totals and base tags to write back on a document line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseLineUpdate {
    pub line_index: usize,
    pub total_excluded_currency: Decimal,
    pub total_excluded: Decimal,
    pub base_tags: BTreeSet<TagId>,
}

/// Result of reconciling computed tax lines against existing ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaxLinesDiff {
    pub to_create: Vec<TaxLine>,
    /// `(existing id, new values)` — identity preserved for audit history.
    pub to_update: Vec<(u64, TaxLine)>,
    pub to_delete: Vec<u64>,
    pub base_line_updates: Vec<BaseLineUpdate>,
}

#[derive(Default)]
struct Aggregate {
    tax: Option<TaxId>,
    use_in_tax_closing: bool,
    keep_zero: bool,
    tax_amount_currency: Decimal,
    tax_amount: Decimal,
    base_amount_currency: Decimal,
    base_amount: Decimal,
}

/// Expand every computed tax amount over its repartition lines and build the
/// accounting tax lines for the document, diffed against `existing`.
///
/// Each tax-data entry expands over the repartition lines of the matching
/// document type whose factor sign matches the entry (positive factors for
/// the normal entry, negative factors for the reverse-charge mirror). The
/// expansion is rounded with the smooth dispatcher so it sums exactly to the
/// entry's already-rounded tax amount, in both currency legs. Zero-amount
/// aggregates are dropped unless a contributing repartition line asks to be
/// kept.
pub fn prepare_tax_lines(
    base_lines: &[BaseLine],
    existing: &[ExistingTaxLine],
) -> Result<TaxLinesDiff, SteuerError> {
    for (index, line) in base_lines.iter().enumerate() {
        if line.tax_details.is_none() {
            return Err(SteuerError::MissingTaxDetails(format!(
                "base line {index} has no computed tax details to map"
            )));
        }
    }

    let mut aggregates: BTreeMap<GroupingKey, Aggregate> = BTreeMap::new();
    let mut base_line_updates = Vec::with_capacity(base_lines.len());

    for (line_index, line) in base_lines.iter().enumerate() {
        let details = line.tax_details.as_ref().unwrap();
        let document_type = line.document_type();
        let currency_step = line.currency.rounding;
        let company_step = line.company_currency.rounding;
        let mut base_tags: BTreeSet<TagId> = BTreeSet::new();

        for data in &details.taxes_data {
            for repartition_line in data.tax.repartition_lines(document_type) {
                if repartition_line.repartition_type == RepartitionType::Base {
                    base_tags.extend(repartition_line.tags.iter().copied());
                }
            }

            let repartition_lines: Vec<_> = data
                .tax
                .repartition_lines(document_type)
                .iter()
                .filter(|line| {
                    line.repartition_type == RepartitionType::Tax
                        && if data.is_reverse_charge {
                            line.factor < Decimal::ZERO
                        } else {
                            line.factor > Decimal::ZERO
                        }
                })
                .collect();
            if repartition_lines.is_empty() {
                continue;
            }
            let factor_sum: Decimal = repartition_lines.iter().map(|line| line.factor).sum();

            let currency_shares = expand_amount(
                data.tax_amount_currency,
                |factor| data.raw_tax_amount_currency * factor / factor_sum,
                &repartition_lines,
                currency_step,
            );
            let company_shares = expand_amount(
                data.tax_amount,
                |factor| data.raw_tax_amount * factor / factor_sum,
                &repartition_lines,
                company_step,
            );

            for (position, repartition_line) in repartition_lines.iter().enumerate() {
                let key = GroupingKey {
                    repartition_line: repartition_line.id,
                    partner: line.partner,
                    currency: line.currency.code.clone(),
                    account: repartition_line.account.or(line.account),
                    tags: repartition_line.tags.clone(),
                    analytic_distribution: line.analytic_distribution.clone(),
                };
                let aggregate = aggregates.entry(key).or_default();
                aggregate.tax = Some(data.tax.id);
                aggregate.use_in_tax_closing |= repartition_line.use_in_tax_closing;
                aggregate.keep_zero |= repartition_line.keep_zero_line;
                aggregate.tax_amount_currency += currency_shares[position];
                aggregate.tax_amount += company_shares[position];
                aggregate.base_amount_currency += data.base_amount_currency;
                aggregate.base_amount += data.base_amount;
            }
        }

        base_line_updates.push(BaseLineUpdate {
            line_index,
            total_excluded_currency: details.total_excluded_currency,
            total_excluded: details.total_excluded,
            base_tags,
        });
    }

    let mut computed: Vec<TaxLine> = Vec::new();
    for (key, aggregate) in aggregates {
        let all_zero = aggregate.tax_amount_currency.is_zero()
            && aggregate.tax_amount.is_zero()
            && aggregate.base_amount_currency.is_zero()
            && aggregate.base_amount.is_zero();
        if all_zero && !aggregate.keep_zero {
            continue;
        }
        computed.push(TaxLine {
            key,
            tax: aggregate.tax.expect("aggregate always built from an entry"),
            use_in_tax_closing: aggregate.use_in_tax_closing,
            tax_amount_currency: aggregate.tax_amount_currency,
            tax_amount: aggregate.tax_amount,
            base_amount_currency: aggregate.base_amount_currency,
            base_amount: aggregate.base_amount,
        });
    }

    let mut diff = TaxLinesDiff {
        base_line_updates,
        ..Default::default()
    };
    let mut consumed = vec![false; existing.len()];
    for tax_line in computed {
        let matched = existing
            .iter()
            .enumerate()
            .find(|(index, candidate)| !consumed[*index] && candidate.key == tax_line.key);
        match matched {
            Some((index, candidate)) => {
                consumed[index] = true;
                diff.to_update.push((candidate.id, tax_line));
            }
            None => diff.to_create.push(tax_line),
        }
    }
    for (index, candidate) in existing.iter().enumerate() {
        if !consumed[index] {
            diff.to_delete.push(candidate.id);
        }
    }
    Ok(diff)
}

/// Per-repartition-line amounts summing exactly to `rounded_total`.
fn expand_amount(
    rounded_total: Decimal,
    raw_share: impl Fn(Decimal) -> Decimal,
    repartition_lines: &[&crate::tax::RepartitionLine],
    step: Decimal,
) -> Vec<Decimal> {
    let raws: Vec<Decimal> = repartition_lines
        .iter()
        .map(|line| raw_share(line.factor))
        .collect();
    let mut shares: Vec<Decimal> = raws
        .iter()
        .map(|&raw| round_to_precision(raw, step, RoundingMethod::HalfUp))
        .collect();
    let delta = rounded_total - shares.iter().copied().sum::<Decimal>();
    let weights: Vec<(usize, Decimal)> = raws.iter().copied().enumerate().collect();
    for (position, amount) in dispatch_delta_smoothly(delta, step, &weights) {
        shares[position] += amount;
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Anchor, BaseLineBuilder, RoundingMode, add_tax_details, round_tax_details};
    use crate::tax::{RepartitionLine, TaxBuilder};
    use rust_decimal_macros::dec;

    fn computed_lines(taxes: Vec<crate::tax::Tax>, price_unit: Decimal) -> Vec<BaseLine> {
        let mut lines = vec![
            BaseLineBuilder::new(price_unit, dec!(1))
                .taxes(taxes)
                .account(AccountId(400))
                .build(),
        ];
        add_tax_details(&mut lines).unwrap();
        round_tax_details(&mut lines, RoundingMode::Globally(Anchor::Mixed)).unwrap();
        lines
    }

    #[test]
    fn repartition_sums_to_rounded_amount() {
        // 50/50 split of an odd cent amount: 0.57 → 0.29 + 0.28.
        let invoice = vec![
            RepartitionLine::new(1, RepartitionType::Base, dec!(1)),
            RepartitionLine::new(2, RepartitionType::Tax, dec!(0.5)).with_account(AccountId(1)),
            RepartitionLine::new(3, RepartitionType::Tax, dec!(0.5)).with_account(AccountId(2)),
        ];
        let refund = invoice
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, mut line)| {
                line.id = RepartitionLineId(10 + i as u32);
                line
            })
            .collect();
        let tax = TaxBuilder::percent(1, "19% split", dec!(19))
            .repartition(invoice, refund)
            .build_unchecked();
        let lines = computed_lines(vec![tax], dec!(3.01));

        let diff = prepare_tax_lines(&lines, &[]).unwrap();
        assert_eq!(diff.to_create.len(), 2);
        let total: Decimal = diff.to_create.iter().map(|line| line.tax_amount_currency).sum();
        let rounded = lines[0].tax_details.as_ref().unwrap().taxes_data[0].tax_amount_currency;
        assert_eq!(total, rounded);
        assert_eq!(rounded, dec!(0.57));
        let amounts: Vec<Decimal> = diff.to_create.iter().map(|l| l.tax_amount_currency).collect();
        assert!(amounts.contains(&dec!(0.29)) && amounts.contains(&dec!(0.28)));
    }

    #[test]
    fn reverse_charge_produces_two_nonzero_lines() {
        let scheme = |base: u32, pos: AccountId, neg: AccountId| {
            vec![
                RepartitionLine::new(base, RepartitionType::Base, dec!(1)),
                RepartitionLine::new(base + 1, RepartitionType::Tax, dec!(1)).with_account(pos),
                RepartitionLine::new(base + 2, RepartitionType::Tax, dec!(-1)).with_account(neg),
            ]
        };
        let tax = TaxBuilder::percent(1, "RC 21%", dec!(21))
            .repartition(
                scheme(1, AccountId(10), AccountId(11)),
                scheme(4, AccountId(10), AccountId(11)),
            )
            .build_unchecked();
        let lines = computed_lines(vec![tax], dec!(100));

        let details = lines[0].tax_details.as_ref().unwrap();
        assert_eq!(details.total_included_currency, dec!(100));

        let diff = prepare_tax_lines(&lines, &[]).unwrap();
        assert_eq!(diff.to_create.len(), 2);
        let net: Decimal = diff.to_create.iter().map(|line| line.tax_amount_currency).sum();
        assert_eq!(net, Decimal::ZERO);
        assert!(diff.to_create.iter().any(|line| line.tax_amount_currency == dec!(21)));
        assert!(diff.to_create.iter().any(|line| line.tax_amount_currency == dec!(-21)));
    }

    #[test]
    fn diff_updates_matching_keys_and_deletes_stale_ones() {
        let tax = TaxBuilder::percent(1, "19%", dec!(19)).build_unchecked();
        let lines = computed_lines(vec![tax], dec!(100));
        let fresh = prepare_tax_lines(&lines, &[]).unwrap();
        assert_eq!(fresh.to_create.len(), 1);
        let created = &fresh.to_create[0];

        let existing = vec![
            ExistingTaxLine {
                id: 71,
                key: created.key.clone(),
                tax_amount_currency: dec!(18.99),
                tax_amount: dec!(18.99),
                base_amount_currency: dec!(100),
                base_amount: dec!(100),
            },
            ExistingTaxLine {
                id: 72,
                key: GroupingKey {
                    repartition_line: RepartitionLineId(999),
                    ..created.key.clone()
                },
                tax_amount_currency: dec!(5),
                tax_amount: dec!(5),
                base_amount_currency: dec!(5),
                base_amount: dec!(5),
            },
        ];
        let diff = prepare_tax_lines(&lines, &existing).unwrap();
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].0, 71);
        assert_eq!(diff.to_update[0].1.tax_amount_currency, dec!(19));
        assert_eq!(diff.to_delete, vec![72]);
    }

    #[test]
    fn zero_amounts_dropped_unless_kept() {
        let mut invoice = vec![
            RepartitionLine::new(1, RepartitionType::Base, dec!(1)),
            RepartitionLine::new(2, RepartitionType::Tax, dec!(1)),
        ];
        let refund = vec![
            RepartitionLine::new(3, RepartitionType::Base, dec!(1)),
            RepartitionLine::new(4, RepartitionType::Tax, dec!(1)),
        ];
        let dropped_tax = TaxBuilder::percent(1, "19%", dec!(19))
            .repartition(invoice.clone(), refund.clone())
            .build_unchecked();
        let mut lines = vec![
            BaseLineBuilder::new(dec!(100), dec!(0)).taxes(vec![dropped_tax]).build(),
        ];
        add_tax_details(&mut lines).unwrap();
        round_tax_details(&mut lines, RoundingMode::PerLine).unwrap();
        let diff = prepare_tax_lines(&lines, &[]).unwrap();
        assert!(diff.to_create.is_empty());

        invoice[1].keep_zero_line = true;
        let kept_tax = TaxBuilder::percent(1, "19%", dec!(19))
            .repartition(invoice, refund)
            .build_unchecked();
        let mut lines = vec![
            BaseLineBuilder::new(dec!(100), dec!(0)).taxes(vec![kept_tax]).build(),
        ];
        add_tax_details(&mut lines).unwrap();
        round_tax_details(&mut lines, RoundingMode::PerLine).unwrap();
        let diff = prepare_tax_lines(&lines, &[]).unwrap();
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_create[0].tax_amount_currency, Decimal::ZERO);
    }

    #[test]
    fn base_line_updates_carry_base_tags() {
        let invoice = vec![
            RepartitionLine::new(1, RepartitionType::Base, dec!(1)).with_tags([TagId(5), TagId(6)]),
            RepartitionLine::new(2, RepartitionType::Tax, dec!(1)),
        ];
        let refund = vec![
            RepartitionLine::new(3, RepartitionType::Base, dec!(1)).with_tags([TagId(7)]),
            RepartitionLine::new(4, RepartitionType::Tax, dec!(1)),
        ];
        let tax = TaxBuilder::percent(1, "19%", dec!(19))
            .repartition(invoice, refund)
            .build_unchecked();
        let lines = computed_lines(vec![tax], dec!(100));
        let diff = prepare_tax_lines(&lines, &[]).unwrap();
        assert_eq!(diff.base_line_updates.len(), 1);
        assert_eq!(
            diff.base_line_updates[0].base_tags,
            BTreeSet::from([TagId(5), TagId(6)])
        );
        assert_eq!(diff.base_line_updates[0].total_excluded_currency, dec!(100));
    }

    #[test]
    fn requires_computed_details() {
        let lines = vec![BaseLineBuilder::new(dec!(10), dec!(1)).build()];
        assert!(matches!(
            prepare_tax_lines(&lines, &[]),
            Err(SteuerError::MissingTaxDetails(_))
        ));
    }
}
