use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Caller-assigned tax identity. Also the sort tie-breaker after `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaxId(pub u32);

/// Identity of a repartition line, stable across recomputations so existing
/// accounting lines can be matched and updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepartitionLineId(pub u32);

/// Target account of an accounting posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

/// Report tag attached to accounting postings (tax grids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub u32);

/// Counterparty of the document, part of the accounting grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartnerId(pub u32);

/// Reporting bucket identity for subtotal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaxGroupId(pub u32);

/// How a tax amount is computed from its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmountType {
    /// Fixed amount per unit of quantity, independent of the price.
    Fixed,
    /// Percentage of the price: `100 * (1 + 10%) = 110` when excluded,
    /// `110 / (1 + 10%) = 100` when included in price.
    Percent,
    /// Percentage of the price tax included: `180 / (1 - 10%) = 200` when
    /// excluded, `200 * (1 - 10%) = 180` when included in price.
    Division,
    /// A set of child taxes evaluated in place of the group.
    Group,
}

/// Whether the document is an invoice or a refund (credit note); selects
/// which repartition list applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    Refund,
}

/// Whether a repartition line splits the tax amount or reports the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepartitionType {
    /// Reports the taxable base (no amount of its own).
    Base,
    /// Receives a share of the computed tax amount.
    Tax,
}

/// Rule splitting a computed tax amount into one accounting posting.
///
/// A tax's repartition lines for one document type must sum to `+1.0` over
/// the positive factors and, when any negative factor exists, to `-1.0` over
/// the negative ones (reverse charge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepartitionLine {
    pub id: RepartitionLineId,
    /// Signed fraction of the tax amount, e.g. `1.0` or `-1.0`.
    pub factor: Decimal,
    pub repartition_type: RepartitionType,
    /// Account to post to; `None` falls back to the document line's account.
    pub account: Option<AccountId>,
    /// Report tags carried onto the generated accounting line.
    pub tags: BTreeSet<TagId>,
    /// Whether the generated line takes part in the periodic tax closing.
    pub use_in_tax_closing: bool,
    /// Emit the accounting line even when its amount rounds to zero, so the
    /// tags stay visible on tax reports.
    pub keep_zero_line: bool,
}

impl RepartitionLine {
    /// A plain repartition line with the given factor and no account/tags.
    pub fn new(id: u32, repartition_type: RepartitionType, factor: Decimal) -> Self {
        Self {
            id: RepartitionLineId(id),
            factor,
            repartition_type,
            account: None,
            tags: BTreeSet::new(),
            use_in_tax_closing: false,
            keep_zero_line: false,
        }
    }

    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = TagId>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// Reporting bucket a tax belongs to; drives the totals-summary layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxGroup {
    pub id: TaxGroupId,
    pub name: String,
    /// Display order of the group among subtotals.
    pub sequence: i32,
    /// Label of the subtotal this group's taxes come after; `None` puts the
    /// group under the default "Untaxed Amount" subtotal.
    pub preceding_subtotal: Option<String>,
}

impl Default for TaxGroup {
    fn default() -> Self {
        Self {
            id: TaxGroupId(0),
            name: "Taxes".into(),
            sequence: 10,
            preceding_subtotal: None,
        }
    }
}

/// Immutable description of one tax.
///
/// A `Group` tax carries only `children` and a `sequence`; it has no
/// repartition lines and its children may not be groups themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tax {
    pub id: TaxId,
    pub name: String,
    pub amount_type: AmountType,
    /// Rate in percent for `Percent`/`Division`, fixed value per quantity
    /// unit for `Fixed`, unused for `Group`.
    pub amount: Decimal,
    /// The quoted price already contains this tax.
    pub price_include: bool,
    /// This tax's amount feeds the base of subsequent base-affected taxes.
    pub include_base_amount: bool,
    /// This tax's base picks up the amounts of earlier base-affecting taxes.
    pub is_base_affected: bool,
    /// Ordering key; ties broken by `id`.
    pub sequence: i32,
    /// Child taxes, only for `AmountType::Group`.
    pub children: Vec<Tax>,
    /// Distribution of the computed amount on invoices.
    pub invoice_repartition: Vec<RepartitionLine>,
    /// Distribution of the computed amount on refunds.
    pub refund_repartition: Vec<RepartitionLine>,
    pub tax_group: TaxGroup,
}

impl Tax {
    /// Repartition lines applicable to the given document type.
    pub fn repartition_lines(&self, document_type: DocumentType) -> &[RepartitionLine] {
        match document_type {
            DocumentType::Invoice => &self.invoice_repartition,
            DocumentType::Refund => &self.refund_repartition,
        }
    }

    /// Sum of the positive `Tax`-type factors (normally `1.0`).
    pub fn positive_factor(&self, document_type: DocumentType) -> Decimal {
        self.repartition_lines(document_type)
            .iter()
            .filter(|line| line.repartition_type == RepartitionType::Tax && line.factor > Decimal::ZERO)
            .map(|line| line.factor)
            .sum()
    }

    /// Sum of the negative `Tax`-type factors (`-1.0` for reverse charge,
    /// zero otherwise).
    pub fn negative_factor(&self, document_type: DocumentType) -> Decimal {
        self.repartition_lines(document_type)
            .iter()
            .filter(|line| line.repartition_type == RepartitionType::Tax && line.factor < Decimal::ZERO)
            .map(|line| line.factor)
            .sum()
    }

    /// True when at least one `Tax`-type repartition line carries a negative
    /// factor — the tax reports on both sides and nets to zero.
    pub fn has_negative_factor(&self, document_type: DocumentType) -> bool {
        !self.negative_factor(document_type).is_zero()
    }
}

/// Builder for [`Tax`].
///
/// Non-group taxes get the default repartition scheme (one base line plus
/// one 100 % tax line, mirrored for refunds) unless repartition lines are
/// set explicitly.
///
/// ```
/// use rust_decimal_macros::dec;
/// use steuerkern::tax::{AmountType, TaxBuilder};
///
/// let vat = TaxBuilder::percent(1, "VAT 21%", dec!(21)).price_include(true).build().unwrap();
/// assert_eq!(vat.amount_type, AmountType::Percent);
/// assert!(vat.price_include);
/// ```
pub struct TaxBuilder {
    tax: Tax,
    explicit_repartition: bool,
}

impl TaxBuilder {
    pub fn new(id: u32, name: impl Into<String>, amount_type: AmountType, amount: Decimal) -> Self {
        Self {
            tax: Tax {
                id: TaxId(id),
                name: name.into(),
                amount_type,
                amount,
                price_include: false,
                include_base_amount: false,
                is_base_affected: true,
                sequence: 1,
                children: Vec::new(),
                invoice_repartition: Vec::new(),
                refund_repartition: Vec::new(),
                tax_group: TaxGroup::default(),
            },
            explicit_repartition: false,
        }
    }

    /// Shorthand for a percentage-of-price tax.
    pub fn percent(id: u32, name: impl Into<String>, rate: Decimal) -> Self {
        Self::new(id, name, AmountType::Percent, rate)
    }

    /// Shorthand for a fixed-amount-per-unit tax.
    pub fn fixed(id: u32, name: impl Into<String>, amount: Decimal) -> Self {
        Self::new(id, name, AmountType::Fixed, amount)
    }

    /// Shorthand for a percentage-of-price-tax-included tax.
    pub fn division(id: u32, name: impl Into<String>, rate: Decimal) -> Self {
        Self::new(id, name, AmountType::Division, rate)
    }

    /// Shorthand for a group of taxes evaluated in the group's place.
    pub fn group(id: u32, name: impl Into<String>, children: Vec<Tax>) -> Self {
        let mut builder = Self::new(id, name, AmountType::Group, Decimal::ZERO);
        builder.tax.children = children;
        builder
    }

    pub fn price_include(mut self, value: bool) -> Self {
        self.tax.price_include = value;
        self
    }

    pub fn include_base_amount(mut self, value: bool) -> Self {
        self.tax.include_base_amount = value;
        self
    }

    pub fn is_base_affected(mut self, value: bool) -> Self {
        self.tax.is_base_affected = value;
        self
    }

    pub fn sequence(mut self, sequence: i32) -> Self {
        self.tax.sequence = sequence;
        self
    }

    pub fn tax_group(mut self, group: TaxGroup) -> Self {
        self.tax.tax_group = group;
        self
    }

    /// Replace the default repartition scheme for both document types.
    pub fn repartition(
        mut self,
        invoice: Vec<RepartitionLine>,
        refund: Vec<RepartitionLine>,
    ) -> Self {
        self.tax.invoice_repartition = invoice;
        self.tax.refund_repartition = refund;
        self.explicit_repartition = true;
        self
    }

    /// Build, running the configuration checks of
    /// [`validate_taxes`](super::validate_taxes).
    pub fn build(self) -> Result<Tax, super::SteuerError> {
        let tax = self.build_unchecked();
        let errors = super::validate_taxes(std::slice::from_ref(&tax));
        if errors.is_empty() {
            Ok(tax)
        } else {
            let msg = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(super::SteuerError::Configuration(msg))
        }
    }

    /// Build without validation — for tests exercising invalid setups.
    pub fn build_unchecked(mut self) -> Tax {
        if !self.explicit_repartition && self.tax.amount_type != AmountType::Group {
            let id = self.tax.id.0;
            let scheme = |offset: u32| {
                vec![
                    RepartitionLine::new(id * 10 + offset, RepartitionType::Base, dec!(1)),
                    RepartitionLine::new(id * 10 + offset + 1, RepartitionType::Tax, dec!(1)),
                ]
            };
            self.tax.invoice_repartition = scheme(0);
            self.tax.refund_repartition = scheme(2);
        }
        self.tax
    }
}
