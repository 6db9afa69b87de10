use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use billflow_core::{
    Aggregate, AggregateRoot, CompanyId, ContactId, DomainError, Event, InvoiceId, OrderId,
    PaymentId, QuoteId, ValueObject,
};
use billflow_pricing::{
    Currency, DocumentLine, Totals, compute_totals, validate_discount_percentage,
};

use crate::payment::{PaymentMethod, PaymentRecord};

/// Invoice variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Standard,
    Deposit,
    CreditNote,
}

/// Payment status, derived from the payment ledger.
///
/// `Overdue` is never stored: it is reported by [`Invoice::status_as_of`]
/// for an unpaid invoice past its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Cancelled,
    Overdue,
}

/// Immutable header data of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub company_id: CompanyId,
    pub contact_id: ContactId,
    pub date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub currency: Currency,
    /// Document-level discount in percent, within [0, 100].
    pub discount_percentage: Decimal,
    pub is_tax_exempt: bool,
}

impl ValueObject for InvoiceHeader {}

/// A credit note issued against this invoice, by id and amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteRef {
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
}

impl ValueObject for CreditNoteRef {}

/// Aggregate root: Invoice.
///
/// The billing artifact in three variants, tracking cumulative payments
/// against its recomputed total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    kind: InvoiceKind,
    order_id: Option<OrderId>,
    quote_id: Option<QuoteId>,
    parent_invoice_id: Option<InvoiceId>,
    header: Option<InvoiceHeader>,
    status: PaymentStatus,
    lines: Vec<DocumentLine>,
    payments: Vec<PaymentRecord>,
    amount_paid: Decimal,
    credit_notes: Vec<CreditNoteRef>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            kind: InvoiceKind::Standard,
            order_id: None,
            quote_id: None,
            parent_invoice_id: None,
            header: None,
            status: PaymentStatus::Unpaid,
            lines: Vec::new(),
            payments: Vec::new(),
            amount_paid: Decimal::ZERO,
            credit_notes: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn kind(&self) -> InvoiceKind {
        self.kind
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn quote_id(&self) -> Option<QuoteId> {
        self.quote_id
    }

    pub fn parent_invoice_id(&self) -> Option<InvoiceId> {
        self.parent_invoice_id
    }

    pub fn header(&self) -> Option<&InvoiceHeader> {
        self.header.as_ref()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    /// The payment ledger. `amount_paid` is always the sum of these records.
    pub fn payments(&self) -> &[PaymentRecord] {
        &self.payments
    }

    pub fn credit_notes(&self) -> &[CreditNoteRef] {
        &self.credit_notes
    }

    /// Totals are always recomputed from lines, never stored.
    pub fn totals(&self) -> Totals {
        match &self.header {
            Some(h) => compute_totals(&self.lines, h.discount_percentage, h.is_tax_exempt),
            None => Totals::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.totals().total
    }

    pub fn amount_paid(&self) -> Decimal {
        self.amount_paid
    }

    pub fn amount_due(&self) -> Decimal {
        self.total() - self.amount_paid
    }

    /// Effective status at `as_of`: an unpaid invoice past its due date
    /// reads as overdue without any stored-state rewrite.
    pub fn status_as_of(&self, as_of: DateTime<Utc>) -> PaymentStatus {
        match (self.status, self.header.as_ref()) {
            (PaymentStatus::Unpaid, Some(h)) if h.due_date < as_of => PaymentStatus::Overdue,
            (status, _) => status,
        }
    }

    /// Cancelled invoices accept no payments; settled invoices need none.
    pub fn can_accept_payment(&self) -> bool {
        self.status != PaymentStatus::Cancelled && self.amount_due() > Decimal::ZERO
    }

    fn derive_status(&self) -> PaymentStatus {
        // Cancellation is sticky: neither payments nor reversals undo it.
        if self.status == PaymentStatus::Cancelled {
            return PaymentStatus::Cancelled;
        }
        if self.amount_paid == Decimal::ZERO {
            PaymentStatus::Unpaid
        } else if self.amount_paid < self.total() {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub kind: InvoiceKind,
    pub order_id: Option<OrderId>,
    pub quote_id: Option<QuoteId>,
    pub parent_invoice_id: Option<InvoiceId>,
    pub header: InvoiceHeader,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReversePayment. Deletes a payment, reversing its effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversePayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid.
///
/// Settles the invoice via an implicit payment equal to the amount due,
/// keeping the ledger invariant intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachCreditNote.
///
/// Parent-side record of a credit note issued against this invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachCreditNote {
    pub invoice_id: InvoiceId,
    pub credit_note_id: InvoiceId,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    ReversePayment(ReversePayment),
    MarkPaid(MarkPaid),
    CancelInvoice(CancelInvoice),
    AttachCreditNote(AttachCreditNote),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub kind: InvoiceKind,
    pub order_id: Option<OrderId>,
    pub quote_id: Option<QuoteId>,
    pub parent_invoice_id: Option<InvoiceId>,
    pub header: InvoiceHeader,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub new_amount_paid: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReversed {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub new_amount_paid: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditNoteAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteAttached {
    pub invoice_id: InvoiceId,
    pub credit_note_id: InvoiceId,
    pub amount: Decimal,
    /// A full credit voids the original obligation.
    pub full: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    PaymentReversed(PaymentReversed),
    InvoiceCancelled(InvoiceCancelled),
    CreditNoteAttached(CreditNoteAttached),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::PaymentReversed(_) => "invoicing.invoice.payment_reversed",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::CreditNoteAttached(_) => "invoicing.invoice.credit_note_attached",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::PaymentReversed(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::CreditNoteAttached(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.kind = e.kind;
                self.order_id = e.order_id;
                self.quote_id = e.quote_id;
                self.parent_invoice_id = e.parent_invoice_id;
                self.header = Some(e.header.clone());
                self.status = PaymentStatus::Unpaid;
                self.lines = e.lines.clone();
                self.payments.clear();
                self.amount_paid = Decimal::ZERO;
                self.credit_notes.clear();
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.payments.push(PaymentRecord {
                    payment_id: e.payment_id,
                    date: e.date,
                    amount: e.amount,
                    method: e.method,
                });
                self.amount_paid = e.new_amount_paid;
                self.status = self.derive_status();
            }
            InvoiceEvent::PaymentReversed(e) => {
                self.payments.retain(|p| p.payment_id != e.payment_id);
                self.amount_paid = e.new_amount_paid;
                self.status = self.derive_status();
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = PaymentStatus::Cancelled;
            }
            InvoiceEvent::CreditNoteAttached(e) => {
                self.credit_notes.push(CreditNoteRef {
                    invoice_id: e.credit_note_id,
                    amount: e.amount,
                });
                if e.full {
                    self.status = PaymentStatus::Cancelled;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::ReversePayment(cmd) => self.handle_reverse_payment(cmd),
            InvoiceCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::AttachCreditNote(cmd) => self.handle_attach_credit_note(cmd),
        }
    }
}

impl Invoice {
    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::validation("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot issue an invoice without lines",
            ));
        }

        for line in &cmd.lines {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(
                    "line unit_price must not be negative",
                ));
            }
        }

        if cmd.header.due_date < cmd.header.date {
            return Err(DomainError::validation(
                "due_date must not precede invoice date",
            ));
        }

        validate_discount_percentage(cmd.header.discount_percentage)?;

        match cmd.kind {
            InvoiceKind::Deposit if cmd.order_id.is_none() => {
                return Err(DomainError::validation(
                    "deposit invoices must reference an order",
                ));
            }
            InvoiceKind::CreditNote if cmd.parent_invoice_id.is_none() => {
                return Err(DomainError::validation(
                    "credit notes must reference a parent invoice",
                ));
            }
            _ => {}
        }

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            invoice_id: cmd.invoice_id,
            kind: cmd.kind,
            order_id: cmd.order_id,
            quote_id: cmd.quote_id,
            parent_invoice_id: cmd.parent_invoice_id,
            header: cmd.header.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status == PaymentStatus::Cancelled {
            return Err(DomainError::transition(
                "cancelled invoices cannot accept payments",
            ));
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        if self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::conflict("payment id already recorded"));
        }

        if cmd.amount > self.amount_due() {
            return Err(DomainError::validation(
                "payment would exceed the amount due",
            ));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            date: cmd.date,
            method: cmd.method,
            new_amount_paid: self.amount_paid + cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse_payment(
        &self,
        cmd: &ReversePayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        let payment = self
            .payments
            .iter()
            .find(|p| p.payment_id == cmd.payment_id)
            .ok_or(DomainError::NotFound)?;

        Ok(vec![InvoiceEvent::PaymentReversed(PaymentReversed {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: payment.amount,
            new_amount_paid: self.amount_paid - payment.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status == PaymentStatus::Cancelled {
            return Err(DomainError::transition(
                "cancelled invoices cannot be settled",
            ));
        }

        let due = self.amount_due();
        if due <= Decimal::ZERO {
            // Already settled; a no-op rather than a duplicate payment.
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: due,
            date: cmd.occurred_at,
            method: cmd.method,
            new_amount_paid: self.amount_paid + due,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status == PaymentStatus::Cancelled {
            return Err(DomainError::transition("invoice is already cancelled"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_credit_note(
        &self,
        cmd: &AttachCreditNote,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.kind != InvoiceKind::Standard {
            return Err(DomainError::validation(
                "credit notes can only be issued against standard invoices",
            ));
        }

        match self.status {
            PaymentStatus::Paid | PaymentStatus::Partial => {}
            _ => {
                return Err(DomainError::transition(
                    "only paid or partially paid invoices can be credited",
                ));
            }
        }

        if cmd.amount <= Decimal::ZERO || cmd.amount > self.total() {
            return Err(DomainError::CreditAmountOutOfRange);
        }

        Ok(vec![InvoiceEvent::CreditNoteAttached(CreditNoteAttached {
            invoice_id: cmd.invoice_id,
            credit_note_id: cmd.credit_note_id,
            amount: cmd.amount,
            full: cmd.amount == self.total(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
