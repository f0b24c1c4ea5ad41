use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::ConfigError;
use super::types::*;

/// Validate a set of taxes against the configuration invariants.
/// Returns all errors found (not just the first).
///
/// Checked per tax:
/// - a group carries no repartition lines of its own and no group children;
/// - a non-group tax has exactly one base repartition line per document
///   type, positive tax factors summing to +100 % and, when negative
///   factors exist, negative factors summing to −100 %;
/// - invoice and refund repartition lists match in length, repartition type
///   sequence and factor per position.
pub fn validate_taxes(taxes: &[Tax]) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    for tax in taxes {
        validate_tax(tax, &mut errors);
    }
    errors
}

fn validate_tax(tax: &Tax, errors: &mut Vec<ConfigError>) {
    if tax.amount_type == AmountType::Group {
        if !tax.invoice_repartition.is_empty() || !tax.refund_repartition.is_empty() {
            errors.push(ConfigError::new(
                &tax.name,
                "a group of taxes cannot carry repartition lines of its own",
            ));
        }
        if tax.children.is_empty() {
            errors.push(ConfigError::new(&tax.name, "a group of taxes needs at least one child"));
        }
        for child in &tax.children {
            if child.amount_type == AmountType::Group {
                errors.push(ConfigError::new(
                    &tax.name,
                    format!("nested group of taxes '{}' is not allowed", child.name),
                ));
            } else {
                validate_tax(child, errors);
            }
        }
        return;
    }

    if !tax.children.is_empty() {
        errors.push(ConfigError::new(
            &tax.name,
            "only a group of taxes can have children",
        ));
    }

    for (document_type, label) in [
        (DocumentType::Invoice, "invoice"),
        (DocumentType::Refund, "refund"),
    ] {
        validate_repartition(tax, document_type, label, errors);
    }

    validate_symmetry(tax, errors);
}

fn validate_repartition(
    tax: &Tax,
    document_type: DocumentType,
    label: &str,
    errors: &mut Vec<ConfigError>,
) {
    let lines = tax.repartition_lines(document_type);

    let base_count = lines
        .iter()
        .filter(|line| line.repartition_type == RepartitionType::Base)
        .count();
    if base_count != 1 {
        errors.push(ConfigError::new(
            &tax.name,
            format!("{label} distribution must contain exactly one line for the base"),
        ));
    }

    let positive = tax.positive_factor(document_type);
    if positive != dec!(1) {
        errors.push(ConfigError::new(
            &tax.name,
            format!("{label} distribution factors must sum to +100%, got {}%", positive * dec!(100)),
        ));
    }

    let negative = tax.negative_factor(document_type);
    if negative != Decimal::ZERO && negative != dec!(-1) {
        errors.push(ConfigError::new(
            &tax.name,
            format!(
                "{label} distribution negative factors must sum to -100%, got {}%",
                negative * dec!(100)
            ),
        ));
    }
}

fn validate_symmetry(tax: &Tax, errors: &mut Vec<ConfigError>) {
    if tax.invoice_repartition.len() != tax.refund_repartition.len() {
        errors.push(ConfigError::new(
            &tax.name,
            "invoice and refund distributions must have the same number of lines",
        ));
        return;
    }
    for (invoice_line, refund_line) in tax.invoice_repartition.iter().zip(&tax.refund_repartition) {
        if invoice_line.repartition_type != refund_line.repartition_type
            || invoice_line.factor != refund_line.factor
        {
            errors.push(ConfigError::new(
                &tax.name,
                "invoice and refund distributions must match (same factors, in the same order)",
            ));
            return;
        }
    }
}
