use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use billflow_core::{DomainError, DomainResult, ProductId, ValueObject};

/// One priced line of a commercial document (quote, order, or invoice).
///
/// A line is owned by exactly one parent document; converting a document
/// copies its lines instead of sharing them, so the source document stays an
/// immutable historical record.
///
/// `product_id` is `None` only for synthetic lines (deposit percentages,
/// credit amounts) that do not bill a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_no: u32,
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Tax rate in percent (e.g. `20` for 20%).
    pub tax_rate: Decimal,
}

impl DocumentLine {
    /// Validating constructor: rejects non-positive quantity, negative price,
    /// or negative tax rate before any totals are computed.
    pub fn new(
        line_no: u32,
        product_id: ProductId,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> DomainResult<Self> {
        Self::build(line_no, Some(product_id), description, quantity, unit_price, tax_rate)
    }

    /// A synthetic single line carrying a derived amount (deposit, credit).
    ///
    /// Quantity 1, no tax: the amount already reflects the parent document's
    /// taxed total.
    pub fn synthetic(
        line_no: u32,
        description: impl Into<String>,
        amount: Decimal,
    ) -> DomainResult<Self> {
        Self::build(line_no, None, description, Decimal::ONE, amount, Decimal::ZERO)
    }

    fn build(
        line_no: u32,
        product_id: Option<ProductId>,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        if unit_price < Decimal::ZERO {
            return Err(DomainError::validation(
                "line unit_price must not be negative",
            ));
        }
        if tax_rate < Decimal::ZERO {
            return Err(DomainError::validation("line tax_rate must not be negative"));
        }
        Ok(Self {
            line_no,
            product_id,
            description: description.into(),
            quantity,
            unit_price,
            tax_rate,
        })
    }

    /// Line subtotal before document-level discount and tax.
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

impl ValueObject for DocumentLine {}
