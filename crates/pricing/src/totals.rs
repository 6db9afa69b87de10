use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use billflow_core::{DomainError, DomainResult, ValueObject};

use crate::line::DocumentLine;

/// Monetary breakdown of a document, derived from its lines.
///
/// Never stored as a source of truth: documents recompute their breakdown
/// from lines on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub subtotal_after_discount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub const ZERO: Totals = Totals {
        subtotal: Decimal::ZERO,
        discount_amount: Decimal::ZERO,
        subtotal_after_discount: Decimal::ZERO,
        tax_amount: Decimal::ZERO,
        total: Decimal::ZERO,
    };

    /// Presentation form: every field rounded to 2 decimal places, midpoint
    /// away from zero. Internal accumulation stays full precision.
    pub fn rounded(&self) -> Totals {
        let r = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Totals {
            subtotal: r(self.subtotal),
            discount_amount: r(self.discount_amount),
            subtotal_after_discount: r(self.subtotal_after_discount),
            tax_amount: r(self.tax_amount),
            total: r(self.total),
        }
    }
}

impl ValueObject for Totals {}

/// Document-level discounts are percentages within [0, 100].
pub fn validate_discount_percentage(discount_percentage: Decimal) -> DomainResult<()> {
    if discount_percentage < Decimal::ZERO || discount_percentage > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(
            "discount_percentage must be within [0, 100]",
        ));
    }
    Ok(())
}

/// Compute the monetary breakdown for a line set.
///
/// The discount applies to the aggregate subtotal; tax is computed **per
/// line** on the proportionally discounted line subtotal and then summed.
/// Taxing the aggregate instead would drift whenever tax rates differ
/// across lines.
///
/// An empty line set yields all-zero totals, never an error.
pub fn compute_totals(
    lines: &[DocumentLine],
    discount_percentage: Decimal,
    is_tax_exempt: bool,
) -> Totals {
    let subtotal: Decimal = lines.iter().map(DocumentLine::subtotal).sum();
    let discount_amount = subtotal * discount_percentage / Decimal::ONE_HUNDRED;
    let subtotal_after_discount = subtotal - discount_amount;

    let mut tax_amount = Decimal::ZERO;
    if !is_tax_exempt && !subtotal.is_zero() {
        for line in lines {
            let line_discount = line.subtotal() / subtotal * discount_amount;
            let line_after_discount = line.subtotal() - line_discount;
            tax_amount += line_after_discount * line.tax_rate / Decimal::ONE_HUNDRED;
        }
    }

    Totals {
        subtotal,
        discount_amount,
        subtotal_after_discount,
        tax_amount,
        total: subtotal_after_discount + tax_amount,
    }
}
