//! Sales documents domain module (event-sourced).
//!
//! This crate contains business rules for quotes and sales orders,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage).

pub mod order;
pub mod quote;

pub use order::{
    AddOrderLine, AttachDepositInvoice, AttachFinalInvoice, CancelOrder, ConfirmOrder,
    CreateOrder, DepositInvoiceAttached, DepositInvoiceRef, FinalInvoiceAttached, MarkDelivered,
    OrderCancelled, OrderConfirmed, OrderCreated, OrderDelivered, OrderFulfillmentStarted,
    OrderHeader, OrderLineAdded, SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderStatus,
    StartFulfillment,
};
pub use quote::{
    AcceptQuote, AddQuoteLine, CancelQuote, CreateQuote, MarkQuoteConverted, MarkQuoteExpired,
    Quote, QuoteAccepted, QuoteCancelled, QuoteCommand, QuoteConverted, QuoteCreated, QuoteEvent,
    QuoteExpired, QuoteHeader, QuoteLineAdded, QuoteRejected, QuoteSent, QuoteStatus, RejectQuote,
    SendQuote,
};
