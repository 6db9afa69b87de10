use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use billflow_core::{Entity, PaymentId};

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Card,
    Cash,
    Cheque,
}

/// A monetary application against exactly one invoice.
///
/// Immutable once recorded; deletion reverses its effect on the invoice and
/// removes it from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

impl Entity for PaymentRecord {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.payment_id
    }
}
