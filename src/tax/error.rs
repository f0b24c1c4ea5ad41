use thiserror::Error;

/// Errors that can occur while computing taxes on a document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SteuerError {
    /// The tax setup violates a configuration invariant (repartition sums,
    /// invoice/refund symmetry, nested groups). Raised before any
    /// computation starts.
    #[error("tax configuration invalid: {0}")]
    Configuration(String),

    /// A rounding or accounting step was called on base lines that never
    /// went through tax-detail computation.
    #[error("tax details missing: {0}")]
    MissingTaxDetails(String),

    /// A base-line manipulation helper received inconsistent inputs.
    #[error("base line error: {0}")]
    BaseLine(String),
}

/// A single tax-configuration error, with the offending tax and a message.
///
/// Validation collects every error instead of stopping at the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Name of the offending tax.
    pub tax: String,
    /// Human-readable error description.
    pub message: String,
}

impl ConfigError {
    pub fn new(tax: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tax: tax.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.tax, self.message)
    }
}
