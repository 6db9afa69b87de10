//! Pricing primitives: document lines and money math.
//!
//! Pure arithmetic over document lines (no IO, no state). All monetary
//! quantities are `Decimal`; accumulation keeps full precision and rounding
//! happens only at presentation boundaries.

pub mod currency;
pub mod line;
pub mod totals;

pub use currency::Currency;
pub use line::DocumentLine;
pub use totals::{Totals, compute_totals, validate_discount_percentage};
