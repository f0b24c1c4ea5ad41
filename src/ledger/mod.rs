//! Accounting repartition mapping.
//!
//! Turns rounded tax details into the exact set of accounting tax lines to
//! post, as a create/update/delete diff against whatever is already there.

mod tax_lines;

pub use tax_lines::*;
