//! Cross-document orchestration (application-level coordination).
//!
//! The `LifecycleCoordinator` runs every engine operation through the same
//! pipeline: load the stream, rehydrate the aggregate, run the pure decision
//! logic, append the produced events with an optimistic concurrency check.
//!
//! Cross-document operations (quote→order, order→deposit invoice,
//! order→final invoice, invoice→credit note) decide on **all** involved
//! aggregates first and then append one atomic multi-stream batch, so a
//! failure on any side aborts the whole operation with nothing written.
//!
//! When a multi-stream append loses an optimistic-concurrency race, the
//! coordinator reloads the guarding aggregate and re-runs the decision once
//! to surface the precise domain error: the loser of two concurrent
//! `convert_order_to_invoice` calls sees `AlreadyInvoiced`, not a bare
//! version conflict. If the re-decision would succeed, the raw `Concurrency`
//! error is returned and retrying is the caller's business.
//!
//! This module contains no IO itself; it composes the [`DocumentStore`]
//! trait.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use billflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Event, ExpectedVersion, InvoiceId,
    OrderId, PaymentId, ProductId, QuoteId,
};
use billflow_invoicing::{
    AttachCreditNote, CancelInvoice, Invoice, InvoiceCommand, InvoiceHeader, InvoiceKind,
    IssueInvoice, MarkPaid, PaymentMethod, RegisterPayment, ReversePayment,
};
use billflow_pricing::DocumentLine;
use billflow_sales::{
    AcceptQuote, AddOrderLine, AddQuoteLine, AttachDepositInvoice, AttachFinalInvoice, CancelOrder,
    CancelQuote, ConfirmOrder, CreateOrder, CreateQuote, MarkDelivered, MarkQuoteConverted,
    MarkQuoteExpired, OrderHeader, Quote, QuoteCommand, QuoteHeader, RejectQuote, SalesOrder,
    SalesOrderCommand, SendQuote, StartFulfillment,
};

use crate::store::{DocumentStore, DocumentStoreError, StoredEvent, StreamAppend, UncommittedEvent};

const QUOTE_AGGREGATE: &str = "sales.quote";
const ORDER_AGGREGATE: &str = "sales.order";
const INVOICE_AGGREGATE: &str = "invoicing.invoice";

/// Coordinator operation error.
///
/// Domain error kinds are forwarded as-is so callers can match on them;
/// store-level failures surface as `Concurrency` or `Store`.
#[derive(Debug)]
pub enum CoordinatorError {
    /// Optimistic concurrency failure (stale document version).
    Concurrency(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Illegal document status change.
    InvalidTransition(String),
    /// One-shot quote conversion already happened.
    AlreadyConverted,
    /// One-shot final invoice already exists.
    AlreadyInvoiced,
    /// Order has a final invoice and cannot be cancelled.
    HasFinalInvoice,
    /// Deposit would exceed the order total.
    DepositExceedsTotal,
    /// Credit note amount outside (0, parent total].
    CreditAmountOutOfRange,
    /// Document not found.
    NotFound,
    /// Failed to deserialize historical event payloads.
    Deserialize(String),
    /// Persisting to the document store failed.
    Store(DocumentStoreError),
}

impl From<DocumentStoreError> for CoordinatorError {
    fn from(value: DocumentStoreError) -> Self {
        match value {
            DocumentStoreError::Concurrency(msg) => CoordinatorError::Concurrency(msg),
            other => CoordinatorError::Store(other),
        }
    }
}

impl From<DomainError> for CoordinatorError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => CoordinatorError::Validation(msg),
            DomainError::InvalidTransition(msg) => CoordinatorError::InvalidTransition(msg),
            DomainError::AlreadyConverted => CoordinatorError::AlreadyConverted,
            DomainError::AlreadyInvoiced => CoordinatorError::AlreadyInvoiced,
            DomainError::HasFinalInvoice => CoordinatorError::HasFinalInvoice,
            DomainError::DepositExceedsTotal => CoordinatorError::DepositExceedsTotal,
            DomainError::CreditAmountOutOfRange => CoordinatorError::CreditAmountOutOfRange,
            DomainError::InvalidId(msg) => CoordinatorError::Validation(msg),
            DomainError::NotFound => CoordinatorError::NotFound,
            DomainError::Conflict(msg) => CoordinatorError::Concurrency(msg),
        }
    }
}

/// Result of converting an order into its final invoice.
///
/// `remaining_amount` is the order total minus its deposit total, surfaced
/// for informational reconciliation. The invoice itself is payable in full;
/// deposits are independent invoices against the order's aggregate position.
#[derive(Debug, Clone)]
pub struct FinalInvoiceOutcome {
    pub invoice: Invoice,
    pub remaining_amount: Decimal,
}

/// Stateless orchestration over an injected document store.
///
/// The clock is injected too: every operation takes `occurred_at` (business
/// time), so the engine stays deterministic under test.
#[derive(Debug)]
pub struct LifecycleCoordinator<S> {
    store: S,
}

impl<S> LifecycleCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> LifecycleCoordinator<S>
where
    S: DocumentStore,
{
    // ---- quotes -----------------------------------------------------------

    pub fn create_quote(
        &self,
        quote_id: QuoteId,
        header: QuoteHeader,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        debug!(%quote_id, "creating quote");
        self.execute_quote(
            quote_id,
            QuoteCommand::CreateQuote(CreateQuote {
                quote_id,
                header,
                occurred_at,
            }),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_quote_line(
        &self,
        quote_id: QuoteId,
        product_id: ProductId,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::AddQuoteLine(AddQuoteLine {
                quote_id,
                product_id,
                description: description.into(),
                quantity,
                unit_price,
                tax_rate,
                occurred_at,
            }),
        )
    }

    pub fn send_quote(
        &self,
        quote_id: QuoteId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::SendQuote(SendQuote {
                quote_id,
                occurred_at,
            }),
        )
    }

    pub fn accept_quote(
        &self,
        quote_id: QuoteId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::AcceptQuote(AcceptQuote {
                quote_id,
                occurred_at,
            }),
        )
    }

    pub fn reject_quote(
        &self,
        quote_id: QuoteId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::RejectQuote(RejectQuote {
                quote_id,
                occurred_at,
            }),
        )
    }

    /// Make a lapsed expiry authoritative on the stored status.
    pub fn expire_quote(
        &self,
        quote_id: QuoteId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::MarkQuoteExpired(MarkQuoteExpired {
                quote_id,
                occurred_at,
            }),
        )
    }

    pub fn cancel_quote(
        &self,
        quote_id: QuoteId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Quote, CoordinatorError> {
        self.execute_quote(
            quote_id,
            QuoteCommand::CancelQuote(CancelQuote {
                quote_id,
                occurred_at,
            }),
        )
    }

    pub fn get_quote(&self, quote_id: QuoteId) -> Result<Quote, CoordinatorError> {
        self.load_existing(quote_id.into(), |id| Quote::empty(QuoteId::new(id)))
    }

    // ---- quote → order ----------------------------------------------------

    /// Convert an accepted quote into an order, copying its lines.
    ///
    /// Atomic: the quote's conversion marker and the new order (with copied
    /// lines) commit together or not at all. Converting the same quote twice
    /// fails with [`CoordinatorError::AlreadyConverted`], also under
    /// concurrent attempts.
    pub fn convert_quote_to_order(
        &self,
        quote_id: QuoteId,
        order_id: OrderId,
        delivery_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        let quote = self.load_existing(quote_id.into(), |id| Quote::empty(QuoteId::new(id)))?;

        let mark = QuoteCommand::MarkQuoteConverted(MarkQuoteConverted {
            quote_id,
            order_id,
            occurred_at,
        });
        let quote_events = quote.handle(&mark).map_err(CoordinatorError::from)?;

        let qh = quote.header().ok_or(CoordinatorError::NotFound)?;
        let header = OrderHeader {
            company_id: qh.company_id,
            contact_id: qh.contact_id,
            date: occurred_at,
            delivery_date,
            currency: qh.currency.clone(),
            discount_percentage: qh.discount_percentage,
            is_tax_exempt: qh.is_tax_exempt,
        };

        let mut order = self.load_aggregate(order_id.into(), |id| {
            SalesOrder::empty(OrderId::new(id))
        })?;
        let create = SalesOrderCommand::CreateOrder(CreateOrder {
            order_id,
            quote_id: Some(quote_id),
            header,
            lines: quote.lines().to_vec(),
            occurred_at,
        });
        let order_events = order.handle(&create).map_err(CoordinatorError::from)?;

        let batches = vec![
            StreamAppend {
                expected_version: ExpectedVersion::Exact(quote.version()),
                events: to_uncommitted(quote_id.into(), QUOTE_AGGREGATE, &quote_events)?,
            },
            StreamAppend {
                expected_version: ExpectedVersion::Exact(order.version()),
                events: to_uncommitted(order_id.into(), ORDER_AGGREGATE, &order_events)?,
            },
        ];

        match self.store.append_batches(batches) {
            Ok(_) => {
                info!(%quote_id, %order_id, "quote converted to order");
                for event in &order_events {
                    order.apply(event);
                }
                Ok(order)
            }
            Err(DocumentStoreError::Concurrency(msg)) => Err(self.refine_conflict(
                quote_id.into(),
                |id| Quote::empty(QuoteId::new(id)),
                &mark,
                msg,
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ---- orders -----------------------------------------------------------

    /// Create an order directly (not derived from a quote). Lines are added
    /// while the order is draft.
    pub fn create_order(
        &self,
        order_id: OrderId,
        header: OrderHeader,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        debug!(%order_id, "creating order");
        self.execute_order(
            order_id,
            SalesOrderCommand::CreateOrder(CreateOrder {
                order_id,
                quote_id: None,
                header,
                lines: Vec::new(),
                occurred_at,
            }),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_order_line(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute_order(
            order_id,
            SalesOrderCommand::AddOrderLine(AddOrderLine {
                order_id,
                product_id,
                description: description.into(),
                quantity,
                unit_price,
                tax_rate,
                occurred_at,
            }),
        )
    }

    pub fn confirm_order(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute_order(
            order_id,
            SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                occurred_at,
            }),
        )
    }

    pub fn start_fulfillment(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute_order(
            order_id,
            SalesOrderCommand::StartFulfillment(StartFulfillment {
                order_id,
                occurred_at,
            }),
        )
    }

    pub fn mark_delivered(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute_order(
            order_id,
            SalesOrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at,
            }),
        )
    }

    pub fn cancel_order(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute_order(
            order_id,
            SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at,
            }),
        )
    }

    pub fn get_order(&self, order_id: OrderId) -> Result<SalesOrder, CoordinatorError> {
        self.load_existing(order_id.into(), |id| SalesOrder::empty(OrderId::new(id)))
    }

    // ---- order → invoices -------------------------------------------------

    /// Bill a percentage of the order total as a deposit invoice.
    ///
    /// The deposit amount is `order total × percentage / 100`, rounded to
    /// 2 decimal places (it becomes a payable document of its own). Atomic:
    /// the order's deposit marker and the new invoice commit together.
    pub fn create_deposit_invoice(
        &self,
        order_id: OrderId,
        invoice_id: InvoiceId,
        percentage: Decimal,
        due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(CoordinatorError::Validation(
                "deposit percentage must be within (0, 100]".to_string(),
            ));
        }

        let order = self.load_existing(order_id.into(), |id| SalesOrder::empty(OrderId::new(id)))?;

        let amount = (order.totals().total * percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        let attach = SalesOrderCommand::AttachDepositInvoice(AttachDepositInvoice {
            order_id,
            invoice_id,
            amount,
            occurred_at,
        });
        let order_events = order.handle(&attach).map_err(CoordinatorError::from)?;

        let oh = order.header().ok_or(CoordinatorError::NotFound)?;
        let line = DocumentLine::synthetic(
            1,
            format!("Deposit {percentage}% on order {order_id}"),
            amount,
        )
        .map_err(CoordinatorError::from)?;
        let issue = InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id,
            kind: InvoiceKind::Deposit,
            order_id: Some(order_id),
            quote_id: order.quote_id(),
            parent_invoice_id: None,
            header: InvoiceHeader {
                company_id: oh.company_id,
                contact_id: oh.contact_id,
                date: occurred_at,
                due_date,
                currency: oh.currency.clone(),
                discount_percentage: Decimal::ZERO,
                is_tax_exempt: oh.is_tax_exempt,
            },
            lines: vec![line],
            occurred_at,
        });

        let mut invoice = self.load_aggregate(invoice_id.into(), |id| {
            Invoice::empty(InvoiceId::new(id))
        })?;
        let invoice_events = invoice.handle(&issue).map_err(CoordinatorError::from)?;

        let batches = vec![
            StreamAppend {
                expected_version: ExpectedVersion::Exact(order.version()),
                events: to_uncommitted(order_id.into(), ORDER_AGGREGATE, &order_events)?,
            },
            StreamAppend {
                expected_version: ExpectedVersion::Exact(invoice.version()),
                events: to_uncommitted(invoice_id.into(), INVOICE_AGGREGATE, &invoice_events)?,
            },
        ];

        match self.store.append_batches(batches) {
            Ok(_) => {
                info!(%order_id, %invoice_id, %amount, "deposit invoice created");
                for event in &invoice_events {
                    invoice.apply(event);
                }
                Ok(invoice)
            }
            Err(DocumentStoreError::Concurrency(msg)) => Err(self.refine_conflict(
                order_id.into(),
                |id| SalesOrder::empty(OrderId::new(id)),
                &attach,
                msg,
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Convert a confirmed order into its final (standard) invoice.
    ///
    /// Order lines are copied verbatim: deposits are tracked as separate
    /// invoices, not deducted from the final invoice's line items, and the
    /// final invoice is payable in full. Atomic, one-shot: a second attempt
    /// fails with [`CoordinatorError::AlreadyInvoiced`], also under
    /// concurrent attempts.
    pub fn convert_order_to_invoice(
        &self,
        order_id: OrderId,
        invoice_id: InvoiceId,
        due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<FinalInvoiceOutcome, CoordinatorError> {
        let order = self.load_existing(order_id.into(), |id| SalesOrder::empty(OrderId::new(id)))?;

        let attach = SalesOrderCommand::AttachFinalInvoice(AttachFinalInvoice {
            order_id,
            invoice_id,
            occurred_at,
        });
        let order_events = order.handle(&attach).map_err(CoordinatorError::from)?;

        let oh = order.header().ok_or(CoordinatorError::NotFound)?;
        let issue = InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id,
            kind: InvoiceKind::Standard,
            order_id: Some(order_id),
            quote_id: order.quote_id(),
            parent_invoice_id: None,
            header: InvoiceHeader {
                company_id: oh.company_id,
                contact_id: oh.contact_id,
                date: occurred_at,
                due_date,
                currency: oh.currency.clone(),
                discount_percentage: oh.discount_percentage,
                is_tax_exempt: oh.is_tax_exempt,
            },
            lines: order.lines().to_vec(),
            occurred_at,
        });

        let mut invoice = self.load_aggregate(invoice_id.into(), |id| {
            Invoice::empty(InvoiceId::new(id))
        })?;
        let invoice_events = invoice.handle(&issue).map_err(CoordinatorError::from)?;

        let batches = vec![
            StreamAppend {
                expected_version: ExpectedVersion::Exact(order.version()),
                events: to_uncommitted(order_id.into(), ORDER_AGGREGATE, &order_events)?,
            },
            StreamAppend {
                expected_version: ExpectedVersion::Exact(invoice.version()),
                events: to_uncommitted(invoice_id.into(), INVOICE_AGGREGATE, &invoice_events)?,
            },
        ];

        match self.store.append_batches(batches) {
            Ok(_) => {
                info!(%order_id, %invoice_id, "final invoice created");
                for event in &invoice_events {
                    invoice.apply(event);
                }
                Ok(FinalInvoiceOutcome {
                    invoice,
                    remaining_amount: order.remaining_amount(),
                })
            }
            Err(DocumentStoreError::Concurrency(msg)) => Err(self.refine_conflict(
                order_id.into(),
                |id| SalesOrder::empty(OrderId::new(id)),
                &attach,
                msg,
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ---- credit notes -----------------------------------------------------

    /// Issue a credit note against a paid or partially paid standard invoice.
    ///
    /// A full credit (amount equal to the parent total) additionally forces
    /// the parent's payment status to cancelled. A partial credit leaves the
    /// parent's amount due untouched; the refund obligation is reconciled by
    /// the accounting collaborator. Atomic across both invoices.
    pub fn create_credit_note(
        &self,
        parent_invoice_id: InvoiceId,
        credit_note_id: InvoiceId,
        amount: Decimal,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        let parent = self.load_existing(parent_invoice_id.into(), |id| {
            Invoice::empty(InvoiceId::new(id))
        })?;

        let attach = InvoiceCommand::AttachCreditNote(AttachCreditNote {
            invoice_id: parent_invoice_id,
            credit_note_id,
            amount,
            occurred_at,
        });
        let parent_events = parent.handle(&attach).map_err(CoordinatorError::from)?;

        let ph = parent.header().ok_or(CoordinatorError::NotFound)?;
        let line = DocumentLine::synthetic(1, reason, amount).map_err(CoordinatorError::from)?;
        let issue = InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id: credit_note_id,
            kind: InvoiceKind::CreditNote,
            order_id: parent.order_id(),
            quote_id: None,
            parent_invoice_id: Some(parent_invoice_id),
            header: InvoiceHeader {
                company_id: ph.company_id,
                contact_id: ph.contact_id,
                date: occurred_at,
                due_date: occurred_at,
                currency: ph.currency.clone(),
                discount_percentage: Decimal::ZERO,
                is_tax_exempt: ph.is_tax_exempt,
            },
            lines: vec![line],
            occurred_at,
        });

        let mut credit_note = self.load_aggregate(credit_note_id.into(), |id| {
            Invoice::empty(InvoiceId::new(id))
        })?;
        let credit_events = credit_note.handle(&issue).map_err(CoordinatorError::from)?;

        let batches = vec![
            StreamAppend {
                expected_version: ExpectedVersion::Exact(parent.version()),
                events: to_uncommitted(
                    parent_invoice_id.into(),
                    INVOICE_AGGREGATE,
                    &parent_events,
                )?,
            },
            StreamAppend {
                expected_version: ExpectedVersion::Exact(credit_note.version()),
                events: to_uncommitted(credit_note_id.into(), INVOICE_AGGREGATE, &credit_events)?,
            },
        ];

        match self.store.append_batches(batches) {
            Ok(_) => {
                info!(%parent_invoice_id, %credit_note_id, %amount, "credit note created");
                for event in &credit_events {
                    credit_note.apply(event);
                }
                Ok(credit_note)
            }
            Err(DocumentStoreError::Concurrency(msg)) => Err(self.refine_conflict(
                parent_invoice_id.into(),
                |id| Invoice::empty(InvoiceId::new(id)),
                &attach,
                msg,
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ---- invoices & payments ----------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn register_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        amount: Decimal,
        date: DateTime<Utc>,
        method: PaymentMethod,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        self.execute_invoice(
            invoice_id,
            InvoiceCommand::RegisterPayment(RegisterPayment {
                invoice_id,
                payment_id,
                amount,
                date,
                method,
                occurred_at,
            }),
        )
    }

    /// Delete a payment, reversing its effect on the invoice.
    pub fn delete_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        self.execute_invoice(
            invoice_id,
            InvoiceCommand::ReversePayment(ReversePayment {
                invoice_id,
                payment_id,
                occurred_at,
            }),
        )
    }

    /// Settle an invoice via an implicit payment equal to its amount due.
    /// A no-op on an already-settled invoice.
    pub fn mark_invoice_paid(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        method: PaymentMethod,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        self.execute_invoice(
            invoice_id,
            InvoiceCommand::MarkPaid(MarkPaid {
                invoice_id,
                payment_id,
                method,
                occurred_at,
            }),
        )
    }

    pub fn cancel_invoice(
        &self,
        invoice_id: InvoiceId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Invoice, CoordinatorError> {
        self.execute_invoice(
            invoice_id,
            InvoiceCommand::CancelInvoice(CancelInvoice {
                invoice_id,
                reason,
                occurred_at,
            }),
        )
    }

    pub fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, CoordinatorError> {
        self.load_existing(invoice_id.into(), |id| Invoice::empty(InvoiceId::new(id)))
    }

    // ---- pipeline ---------------------------------------------------------

    fn execute_quote(
        &self,
        quote_id: QuoteId,
        command: QuoteCommand,
    ) -> Result<Quote, CoordinatorError> {
        self.execute(quote_id.into(), QUOTE_AGGREGATE, command, |id| {
            Quote::empty(QuoteId::new(id))
        })
    }

    fn execute_order(
        &self,
        order_id: OrderId,
        command: SalesOrderCommand,
    ) -> Result<SalesOrder, CoordinatorError> {
        self.execute(order_id.into(), ORDER_AGGREGATE, command, |id| {
            SalesOrder::empty(OrderId::new(id))
        })
    }

    fn execute_invoice(
        &self,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<Invoice, CoordinatorError> {
        self.execute(invoice_id.into(), INVOICE_AGGREGATE, command, |id| {
            Invoice::empty(InvoiceId::new(id))
        })
    }

    /// Single-document pipeline: load, rehydrate, decide, persist.
    ///
    /// Returns the updated aggregate with the decided events applied. An
    /// empty decision (e.g. `mark_invoice_paid` on a settled invoice) skips
    /// the append entirely.
    fn execute<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, CoordinatorError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = self.load_aggregate(aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(aggregate.version());

        let decided = aggregate.handle(&command).map_err(CoordinatorError::from)?;
        if decided.is_empty() {
            return Ok(aggregate);
        }

        let uncommitted = to_uncommitted(aggregate_id, aggregate_type, &decided)?;
        self.store.append(uncommitted, expected)?;

        for event in &decided {
            aggregate.apply(event);
        }
        Ok(aggregate)
    }

    fn load_aggregate<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, CoordinatorError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    fn load_existing<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, CoordinatorError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let aggregate = self.load_aggregate(aggregate_id, make_aggregate)?;
        if aggregate.version() == 0 {
            return Err(CoordinatorError::NotFound);
        }
        Ok(aggregate)
    }

    /// Reload the guarding aggregate after a lost race and re-run the pure
    /// decision once, so the caller sees the precise domain error instead of
    /// a bare version conflict.
    fn refine_conflict<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
        command: &A::Command,
        conflict_msg: String,
    ) -> CoordinatorError
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        match self.load_aggregate(aggregate_id, make_aggregate) {
            Ok(aggregate) => match aggregate.handle(command) {
                Err(domain_err) => domain_err.into(),
                Ok(_) => CoordinatorError::Concurrency(conflict_msg),
            },
            Err(load_err) => load_err,
        }
    }
}

fn to_uncommitted<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, CoordinatorError>
where
    E: Event + Serialize,
{
    events
        .iter()
        .map(|event| {
            UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), event)
                .map_err(CoordinatorError::from)
        })
        .collect()
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), CoordinatorError> {
    // Defense in depth even if a buggy backend returns mixed streams: the
    // stream must belong to this document and be monotonically ordered.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(CoordinatorError::Store(DocumentStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number <= last {
            return Err(CoordinatorError::Store(DocumentStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), CoordinatorError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let event: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| CoordinatorError::Deserialize(e.to_string()))?;
        aggregate.apply(&event);
    }
    Ok(())
}
