use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::details::TaxDetails;
use crate::tax::{AccountId, DocumentType, PartnerId, SteuerError, Tax};

/// A currency as the engine sees it: a code for grouping and a rounding
/// *step* (e.g. `0.01`). Rounding itself goes through
/// [`round_to_precision`](crate::rounding::round_to_precision) — the
/// precision is data, not behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency {
    /// ISO 4217 code (e.g. "EUR").
    pub code: String,
    /// Precision step amounts are rounded to.
    pub rounding: Decimal,
}

impl Currency {
    pub fn new(code: impl Into<String>, rounding: Decimal) -> Self {
        Self {
            code: code.into(),
            rounding,
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("EUR", dec!(0.01))
    }
}

/// How the quoted price of a line relates to its taxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpecialMode {
    /// `price_unit` is the ordinary quoted price: price-included taxes are
    /// contained in it, price-excluded ones are not.
    #[default]
    None,
    /// `price_unit` is already stripped of every tax, price-included ones
    /// too (a caller working from an untaxed total).
    TotalExcluded,
    /// `price_unit` contains every tax, price-excluded ones too (a caller
    /// working from a tax-included total).
    TotalIncluded,
}

/// One taxable document line.
///
/// Built by [`BaseLineBuilder`]; transformed only by the engine's own
/// helpers ([`split_base_line`], [`merge_base_lines`], [`apply_discount`]),
/// each of which yields new values. The `tax_details` attachment is created
/// by [`add_tax_details`](super::add_tax_details) and refined in place by
/// [`round_tax_details`](super::round_tax_details).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseLine {
    pub price_unit: Decimal,
    pub quantity: Decimal,
    /// Discount percentage applied to `price_unit × quantity`.
    pub discount: Decimal,
    pub currency: Currency,
    pub company_currency: Currency,
    /// Document-currency units per company-currency unit; company amounts
    /// are `amount / rate` (a zero rate yields zero).
    pub rate: Decimal,
    /// Applicable taxes, in no particular order (ordering is derived from
    /// each tax's `sequence`).
    pub taxes: Vec<Tax>,
    pub is_refund: bool,
    pub special_mode: SpecialMode,
    pub partner: Option<PartnerId>,
    /// Account of the document line itself; repartition lines without an
    /// account of their own post here.
    pub account: Option<AccountId>,
    /// Analytic distribution (account → percentage), carried onto the
    /// accounting grouping key.
    pub analytic_distribution: BTreeMap<AccountId, Decimal>,
    pub tax_details: Option<TaxDetails>,
}

impl BaseLine {
    /// Document type selecting the repartition lists.
    pub fn document_type(&self) -> DocumentType {
        if self.is_refund {
            DocumentType::Refund
        } else {
            DocumentType::Invoice
        }
    }

    /// `quantity × price_unit × (1 − discount/100)` — the starting amount
    /// every computation works from.
    pub fn raw_base(&self) -> Decimal {
        self.quantity * self.price_unit * (Decimal::ONE - self.discount / dec!(100))
    }

    /// Convert a document-currency amount to company currency.
    pub fn to_company(&self, amount: Decimal) -> Decimal {
        if self.rate.is_zero() {
            Decimal::ZERO
        } else {
            amount / self.rate
        }
    }
}

/// Builder for [`BaseLine`] — the `prepare_base_line` entry point. Every
/// field is a caller-supplied scalar; nothing is inferred from any store.
///
/// ```
/// use rust_decimal_macros::dec;
/// use steuerkern::compute::BaseLineBuilder;
/// use steuerkern::tax::TaxBuilder;
///
/// let vat = TaxBuilder::percent(1, "VAT 21%", dec!(21)).build().unwrap();
/// let line = BaseLineBuilder::new(dec!(100), dec!(1)).taxes(vec![vat]).build();
/// assert_eq!(line.raw_base(), dec!(100));
/// ```
pub struct BaseLineBuilder {
    line: BaseLine,
}

impl BaseLineBuilder {
    pub fn new(price_unit: Decimal, quantity: Decimal) -> Self {
        Self {
            line: BaseLine {
                price_unit,
                quantity,
                discount: Decimal::ZERO,
                currency: Currency::default(),
                company_currency: Currency::default(),
                rate: Decimal::ONE,
                taxes: Vec::new(),
                is_refund: false,
                special_mode: SpecialMode::None,
                partner: None,
                account: None,
                analytic_distribution: BTreeMap::new(),
                tax_details: None,
            },
        }
    }

    pub fn discount(mut self, percent: Decimal) -> Self {
        self.line.discount = percent;
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.line.currency = currency;
        self
    }

    pub fn company_currency(mut self, currency: Currency) -> Self {
        self.line.company_currency = currency;
        self
    }

    pub fn rate(mut self, rate: Decimal) -> Self {
        self.line.rate = rate;
        self
    }

    pub fn taxes(mut self, taxes: Vec<Tax>) -> Self {
        self.line.taxes = taxes;
        self
    }

    pub fn is_refund(mut self, value: bool) -> Self {
        self.line.is_refund = value;
        self
    }

    pub fn special_mode(mut self, mode: SpecialMode) -> Self {
        self.line.special_mode = mode;
        self
    }

    pub fn partner(mut self, partner: PartnerId) -> Self {
        self.line.partner = Some(partner);
        self
    }

    pub fn account(mut self, account: AccountId) -> Self {
        self.line.account = Some(account);
        self
    }

    pub fn analytic_distribution(mut self, distribution: BTreeMap<AccountId, Decimal>) -> Self {
        self.line.analytic_distribution = distribution;
        self
    }

    pub fn build(self) -> BaseLine {
        self.line
    }
}

/// Split a line in two at `quantity`, dropping any computed details so both
/// halves get recomputed. The halves sum to the original totals for every
/// amount type (fixed taxes scale with quantity).
pub fn split_base_line(
    line: &BaseLine,
    quantity: Decimal,
) -> Result<(BaseLine, BaseLine), SteuerError> {
    if quantity <= Decimal::ZERO || quantity >= line.quantity {
        return Err(SteuerError::BaseLine(format!(
            "split quantity {} must lie strictly between 0 and {}",
            quantity, line.quantity
        )));
    }
    let mut first = line.clone();
    let mut second = line.clone();
    first.quantity = quantity;
    second.quantity = line.quantity - quantity;
    first.tax_details = None;
    second.tax_details = None;
    Ok((first, second))
}

/// Merge two lines with identical pricing and tax configuration into one,
/// summing quantities. Details are dropped for recomputation.
pub fn merge_base_lines(a: &BaseLine, b: &BaseLine) -> Result<BaseLine, SteuerError> {
    let same_taxes = a.taxes.len() == b.taxes.len()
        && a.taxes.iter().zip(&b.taxes).all(|(x, y)| x.id == y.id);
    if a.price_unit != b.price_unit
        || a.discount != b.discount
        || a.currency != b.currency
        || a.rate != b.rate
        || a.is_refund != b.is_refund
        || a.special_mode != b.special_mode
        || !same_taxes
    {
        return Err(SteuerError::BaseLine(
            "lines can only be merged when price, discount, currency, rate and taxes match".into(),
        ));
    }
    let mut merged = a.clone();
    merged.quantity = a.quantity + b.quantity;
    merged.tax_details = None;
    Ok(merged)
}

/// Return a copy of the line with an extra discount compounded onto the
/// existing one: a 10 % discount on a line already at 20 % yields 28 %.
pub fn apply_discount(line: &BaseLine, percent: Decimal) -> BaseLine {
    let remaining = (Decimal::ONE - line.discount / dec!(100))
        * (Decimal::ONE - percent / dec!(100));
    let mut discounted = line.clone();
    discounted.discount = (Decimal::ONE - remaining) * dec!(100);
    discounted.tax_details = None;
    discounted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::TaxBuilder;

    fn line(quantity: Decimal) -> BaseLine {
        let vat = TaxBuilder::percent(1, "VAT 19%", dec!(19)).build_unchecked();
        BaseLineBuilder::new(dec!(25), quantity)
            .taxes(vec![vat])
            .build()
    }

    #[test]
    fn raw_base_applies_discount() {
        let l = BaseLineBuilder::new(dec!(100), dec!(2))
            .discount(dec!(25))
            .build();
        assert_eq!(l.raw_base(), dec!(150));
    }

    #[test]
    fn split_preserves_quantity() {
        let original = line(dec!(10));
        let (a, b) = split_base_line(&original, dec!(4)).unwrap();
        assert_eq!(a.quantity, dec!(4));
        assert_eq!(b.quantity, dec!(6));
        assert_eq!(a.raw_base() + b.raw_base(), original.raw_base());
        assert!(split_base_line(&original, dec!(10)).is_err());
        assert!(split_base_line(&original, dec!(0)).is_err());
    }

    #[test]
    fn merge_requires_matching_configuration() {
        let a = line(dec!(3));
        let b = line(dec!(7));
        let merged = merge_base_lines(&a, &b).unwrap();
        assert_eq!(merged.quantity, dec!(10));

        let mut other_price = line(dec!(1));
        other_price.price_unit = dec!(30);
        assert!(merge_base_lines(&a, &other_price).is_err());
    }

    #[test]
    fn discount_compounds() {
        let base = BaseLineBuilder::new(dec!(100), dec!(1))
            .discount(dec!(20))
            .build();
        let discounted = apply_discount(&base, dec!(10));
        assert_eq!(discounted.discount, dec!(28));
        assert_eq!(discounted.raw_base(), dec!(72));
    }

    #[test]
    fn company_conversion_guards_zero_rate() {
        let mut l = line(dec!(1));
        l.rate = dec!(0);
        assert_eq!(l.to_company(dec!(10)), dec!(0));
        l.rate = dec!(4);
        assert_eq!(l.to_company(dec!(10)), dec!(2.5));
    }
}
