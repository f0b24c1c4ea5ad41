use rust_decimal::Decimal;

use super::types::*;

/// One tax in the flattened, ordered application sequence.
#[derive(Debug, Clone)]
pub struct FlatTax {
    pub tax: Tax,
    /// Owning group of taxes, when this tax was expanded from one.
    pub group: Option<TaxId>,
    /// Index into the batch list.
    pub batch: usize,
    /// Sum of the positive `Tax`-type repartition factors.
    pub factor: Decimal,
    /// Sum of the negative `Tax`-type repartition factors (reverse charge).
    pub negative_factor: Decimal,
}

/// A maximal run of taxes evaluated jointly: the combined rate of the batch
/// feeds each member's amount (two stacked 10 % price-included taxes each
/// yield 10, not 12, on a quoted 120).
#[derive(Debug, Clone)]
pub struct TaxBatch {
    pub amount_type: AmountType,
    pub price_include: bool,
    pub include_base_amount: bool,
    pub has_negative_factor: bool,
    /// Combined factor-weighted rate of the batch, in percent.
    pub total_rate: Decimal,
    /// Members, as ascending positions in the flattened sequence.
    pub tax_indexes: Vec<usize>,
}

/// Flatten a set of taxes into the ordered application sequence and partition
/// it into batches.
///
/// Taxes are ordered by `(sequence, id)`; a group is replaced in place by its
/// children (ordered the same way among themselves, at the group's position).
/// Batches are grown by scanning the sequence in reverse: a tax joins the
/// current batch while amount type, price inclusion, base-affecting behavior
/// and reverse-charge presence all match and the previously added member is
/// not itself affected by earlier bases (an intervening base-affected tax
/// closes the batch).
pub fn flatten_and_batch(
    taxes: &[Tax],
    document_type: DocumentType,
) -> (Vec<FlatTax>, Vec<TaxBatch>) {
    let mut sorted: Vec<&Tax> = taxes.iter().collect();
    sorted.sort_by_key(|tax| (tax.sequence, tax.id));

    let mut flat = Vec::new();
    for tax in sorted {
        if tax.amount_type == AmountType::Group {
            let mut children: Vec<&Tax> = tax.children.iter().collect();
            children.sort_by_key(|child| (child.sequence, child.id));
            for child in children {
                flat.push(FlatTax {
                    tax: child.clone(),
                    group: Some(tax.id),
                    batch: 0,
                    factor: child.positive_factor(document_type),
                    negative_factor: child.negative_factor(document_type),
                });
            }
        } else {
            flat.push(FlatTax {
                tax: tax.clone(),
                group: None,
                batch: 0,
                factor: tax.positive_factor(document_type),
                negative_factor: tax.negative_factor(document_type),
            });
        }
    }

    let batches = partition_into_batches(&mut flat);
    (flat, batches)
}

fn partition_into_batches(flat: &mut [FlatTax]) -> Vec<TaxBatch> {
    let mut reversed_batches: Vec<TaxBatch> = Vec::new();
    let mut current: Option<TaxBatch> = None;
    let mut last_is_base_affected = false;

    for index in (0..flat.len()).rev() {
        let entry = &flat[index];
        let tax = &entry.tax;
        let has_negative = !entry.negative_factor.is_zero();

        let same_batch = current.as_ref().is_some_and(|batch| {
            let rate_based = matches!(tax.amount_type, AmountType::Percent | AmountType::Division);
            tax.amount_type == batch.amount_type
                && tax.price_include == batch.price_include
                && tax.include_base_amount == batch.include_base_amount
                && (!rate_based || has_negative == batch.has_negative_factor)
                && (!tax.include_base_amount || !last_is_base_affected)
        });
        if current.is_some() && !same_batch {
            reversed_batches.push(current.take().unwrap());
        }

        let batch = current.get_or_insert_with(|| TaxBatch {
            amount_type: tax.amount_type,
            price_include: tax.price_include,
            include_base_amount: tax.include_base_amount,
            has_negative_factor: has_negative,
            total_rate: Decimal::ZERO,
            tax_indexes: Vec::new(),
        });
        batch.total_rate += tax.amount * entry.factor.abs();
        batch.tax_indexes.push(index);
        last_is_base_affected = tax.is_base_affected;
    }
    if let Some(batch) = current {
        reversed_batches.push(batch);
    }

    let mut batches: Vec<TaxBatch> = reversed_batches.into_iter().rev().collect();
    for (batch_index, batch) in batches.iter_mut().enumerate() {
        batch.tax_indexes.reverse();
        for &tax_index in &batch.tax_indexes {
            flat[tax_index].batch = batch_index;
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::TaxBuilder;
    use rust_decimal_macros::dec;

    fn percent(id: u32, name: &str, rate: Decimal, sequence: i32) -> Tax {
        TaxBuilder::percent(id, name, rate)
            .sequence(sequence)
            .build_unchecked()
    }

    #[test]
    fn groups_expand_at_their_sequence_position() {
        // Considering letters as taxes and alphabetic order as sequence:
        // [G, B([A, D, F]), E, C] flattens to [A, D, F, C, E, G].
        let a = percent(1, "A", dec!(1), 1);
        let d = percent(4, "D", dec!(1), 4);
        let f = percent(6, "F", dec!(1), 6);
        let b = TaxBuilder::group(2, "B", vec![f.clone(), a.clone(), d.clone()])
            .sequence(2)
            .build_unchecked();
        let c = percent(3, "C", dec!(1), 3);
        let e = percent(5, "E", dec!(1), 5);
        let g = percent(7, "G", dec!(1), 7);

        let (flat, _) = flatten_and_batch(&[g, b, e, c], DocumentType::Invoice);
        let names: Vec<&str> = flat.iter().map(|t| t.tax.name.as_str()).collect();
        assert_eq!(names, ["A", "D", "F", "C", "E", "G"]);
        assert_eq!(flat[0].group, Some(TaxId(2)));
        assert_eq!(flat[3].group, None);
    }

    #[test]
    fn stacked_price_included_percents_share_a_batch() {
        let tax1 = TaxBuilder::percent(1, "10% incl", dec!(10))
            .price_include(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "10% incl bis", dec!(10))
            .price_include(true)
            .sequence(2)
            .build_unchecked();
        let (flat, batches) = flatten_and_batch(&[tax1, tax2], DocumentType::Invoice);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_rate, dec!(20));
        assert_eq!(flat[0].batch, 0);
        assert_eq!(flat[1].batch, 0);
    }

    #[test]
    fn base_affected_member_closes_the_batch() {
        // Two base-affecting 6% taxes followed by a 3%: the second 6% is not
        // base-affected, so both 6% taxes share a batch; the 3% stands alone.
        let tax1 = TaxBuilder::percent(1, "6% a", dec!(6))
            .include_base_amount(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "6% b", dec!(6))
            .include_base_amount(true)
            .is_base_affected(false)
            .sequence(2)
            .build_unchecked();
        let tax3 = percent(3, "3%", dec!(3), 3);
        let (flat, batches) = flatten_and_batch(&[tax1, tax2, tax3], DocumentType::Invoice);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].tax_indexes, vec![0, 1]);
        assert_eq!(batches[1].tax_indexes, vec![2]);
        assert_eq!(flat[2].batch, 1);

        // Making the second 6% base-affected splits the first one off.
        let tax1 = TaxBuilder::percent(1, "6% a", dec!(6))
            .include_base_amount(true)
            .sequence(1)
            .build_unchecked();
        let tax2 = TaxBuilder::percent(2, "6% b", dec!(6))
            .include_base_amount(true)
            .sequence(2)
            .build_unchecked();
        let tax3 = percent(3, "3%", dec!(3), 3);
        let (_, batches) = flatten_and_batch(&[tax1, tax2, tax3], DocumentType::Invoice);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn mixed_amount_types_do_not_batch() {
        let fixed = TaxBuilder::fixed(1, "fix", dec!(1))
            .sequence(1)
            .build_unchecked();
        let pct = percent(2, "21%", dec!(21), 2);
        let (_, batches) = flatten_and_batch(&[fixed, pct], DocumentType::Invoice);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].amount_type, AmountType::Fixed);
        assert_eq!(batches[1].amount_type, AmountType::Percent);
    }

    #[test]
    fn reverse_charge_percent_batches_separately() {
        let rc_lines = |base: u32| {
            vec![
                RepartitionLine::new(base, RepartitionType::Base, dec!(1)),
                RepartitionLine::new(base + 1, RepartitionType::Tax, dec!(1)),
                RepartitionLine::new(base + 2, RepartitionType::Tax, dec!(-1)),
            ]
        };
        let normal = percent(1, "10%", dec!(10), 1);
        let reverse = TaxBuilder::percent(2, "10% rc", dec!(10))
            .sequence(2)
            .repartition(rc_lines(1), rc_lines(4))
            .build_unchecked();
        let (_, batches) = flatten_and_batch(&[normal, reverse], DocumentType::Invoice);
        assert_eq!(batches.len(), 2);
        assert!(!batches[0].has_negative_factor);
        assert!(batches[1].has_negative_factor);
    }
}
