//! Invoicing domain module (event-sourced).
//!
//! This crate contains business rules for invoices (standard, deposit,
//! credit-note) and their payment ledgers, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod invoice;
pub mod payment;

pub use invoice::{
    AttachCreditNote, CancelInvoice, CreditNoteAttached, CreditNoteRef, Invoice, InvoiceCancelled,
    InvoiceCommand, InvoiceEvent, InvoiceHeader, InvoiceIssued, InvoiceKind, IssueInvoice,
    MarkPaid, PaymentRegistered, PaymentReversed, PaymentStatus, RegisterPayment, ReversePayment,
};
pub use payment::{PaymentMethod, PaymentRecord};
