use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use billflow_core::{
    Aggregate, AggregateRoot, CompanyId, ContactId, DomainError, Event, OrderId, ProductId,
    QuoteId, ValueObject,
};
use billflow_pricing::{Currency, DocumentLine, Totals, compute_totals, validate_discount_percentage};

/// Quote status lifecycle.
///
/// `Expired` is derived: a sent quote past its expiration date reads as
/// expired (see [`Quote::status_as_of`]) and the stored status only becomes
/// `Expired` once a transition makes it authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

/// Immutable header data of a quote, copied onto anything derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteHeader {
    pub company_id: CompanyId,
    pub contact_id: ContactId,
    pub date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub currency: Currency,
    /// Document-level discount in percent, within [0, 100].
    pub discount_percentage: Decimal,
    pub is_tax_exempt: bool,
}

impl ValueObject for QuoteHeader {}

/// Aggregate root: Quote.
///
/// A priced proposal with an expiry and an acceptance state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    id: QuoteId,
    header: Option<QuoteHeader>,
    status: QuoteStatus,
    lines: Vec<DocumentLine>,
    converted_to: Option<OrderId>,
    version: u64,
    created: bool,
}

impl Quote {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: QuoteId) -> Self {
        Self {
            id,
            header: None,
            status: QuoteStatus::Draft,
            lines: Vec::new(),
            converted_to: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> QuoteId {
        self.id
    }

    pub fn header(&self) -> Option<&QuoteHeader> {
        self.header.as_ref()
    }

    pub fn status(&self) -> QuoteStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn converted_to(&self) -> Option<OrderId> {
        self.converted_to
    }

    /// Effective status at `as_of`: a sent quote past its expiration date
    /// reads as expired without any stored-state rewrite.
    pub fn status_as_of(&self, as_of: DateTime<Utc>) -> QuoteStatus {
        match (self.status, self.header.as_ref()) {
            (QuoteStatus::Sent, Some(h)) if as_of > h.expiration_date => QuoteStatus::Expired,
            (status, _) => status,
        }
    }

    /// Totals are always recomputed from lines, never stored.
    pub fn totals(&self) -> Totals {
        match &self.header {
            Some(h) => compute_totals(&self.lines, h.discount_percentage, h.is_tax_exempt),
            None => Totals::ZERO,
        }
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, QuoteStatus::Draft)
    }
}

impl AggregateRoot for Quote {
    type Id = QuoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQuote {
    pub quote_id: QuoteId,
    pub header: QuoteHeader,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddQuoteLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddQuoteLine {
    pub quote_id: QuoteId,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkQuoteExpired. Makes a lapsed expiry authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkQuoteExpired {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkQuoteConverted. Records the one-shot conversion to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkQuoteConverted {
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteCommand {
    CreateQuote(CreateQuote),
    AddQuoteLine(AddQuoteLine),
    SendQuote(SendQuote),
    AcceptQuote(AcceptQuote),
    RejectQuote(RejectQuote),
    MarkQuoteExpired(MarkQuoteExpired),
    CancelQuote(CancelQuote),
    MarkQuoteConverted(MarkQuoteConverted),
}

/// Event: QuoteCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCreated {
    pub quote_id: QuoteId,
    pub header: QuoteHeader,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLineAdded {
    pub quote_id: QuoteId,
    pub line: DocumentLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSent {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteAccepted {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRejected {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteExpired {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCancelled {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteConverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteConverted {
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteEvent {
    QuoteCreated(QuoteCreated),
    QuoteLineAdded(QuoteLineAdded),
    QuoteSent(QuoteSent),
    QuoteAccepted(QuoteAccepted),
    QuoteRejected(QuoteRejected),
    QuoteExpired(QuoteExpired),
    QuoteCancelled(QuoteCancelled),
    QuoteConverted(QuoteConverted),
}

impl Event for QuoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QuoteEvent::QuoteCreated(_) => "sales.quote.created",
            QuoteEvent::QuoteLineAdded(_) => "sales.quote.line_added",
            QuoteEvent::QuoteSent(_) => "sales.quote.sent",
            QuoteEvent::QuoteAccepted(_) => "sales.quote.accepted",
            QuoteEvent::QuoteRejected(_) => "sales.quote.rejected",
            QuoteEvent::QuoteExpired(_) => "sales.quote.expired",
            QuoteEvent::QuoteCancelled(_) => "sales.quote.cancelled",
            QuoteEvent::QuoteConverted(_) => "sales.quote.converted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QuoteEvent::QuoteCreated(e) => e.occurred_at,
            QuoteEvent::QuoteLineAdded(e) => e.occurred_at,
            QuoteEvent::QuoteSent(e) => e.occurred_at,
            QuoteEvent::QuoteAccepted(e) => e.occurred_at,
            QuoteEvent::QuoteRejected(e) => e.occurred_at,
            QuoteEvent::QuoteExpired(e) => e.occurred_at,
            QuoteEvent::QuoteCancelled(e) => e.occurred_at,
            QuoteEvent::QuoteConverted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Quote {
    type Command = QuoteCommand;
    type Event = QuoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            QuoteEvent::QuoteCreated(e) => {
                self.id = e.quote_id;
                self.header = Some(e.header.clone());
                self.status = QuoteStatus::Draft;
                self.lines.clear();
                self.converted_to = None;
                self.created = true;
            }
            QuoteEvent::QuoteLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            QuoteEvent::QuoteSent(_) => {
                self.status = QuoteStatus::Sent;
            }
            QuoteEvent::QuoteAccepted(_) => {
                self.status = QuoteStatus::Accepted;
            }
            QuoteEvent::QuoteRejected(_) => {
                self.status = QuoteStatus::Rejected;
            }
            QuoteEvent::QuoteExpired(_) => {
                self.status = QuoteStatus::Expired;
            }
            QuoteEvent::QuoteCancelled(_) => {
                self.status = QuoteStatus::Cancelled;
            }
            QuoteEvent::QuoteConverted(e) => {
                self.converted_to = Some(e.order_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            QuoteCommand::CreateQuote(cmd) => self.handle_create(cmd),
            QuoteCommand::AddQuoteLine(cmd) => self.handle_add_line(cmd),
            QuoteCommand::SendQuote(cmd) => self.handle_send(cmd),
            QuoteCommand::AcceptQuote(cmd) => self.handle_accept(cmd),
            QuoteCommand::RejectQuote(cmd) => self.handle_reject(cmd),
            QuoteCommand::MarkQuoteExpired(cmd) => self.handle_mark_expired(cmd),
            QuoteCommand::CancelQuote(cmd) => self.handle_cancel(cmd),
            QuoteCommand::MarkQuoteConverted(cmd) => self.handle_mark_converted(cmd),
        }
    }
}

impl Quote {
    fn ensure_quote_id(&self, quote_id: QuoteId) -> Result<(), DomainError> {
        if self.id != quote_id {
            return Err(DomainError::validation("quote_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    /// A sent quote past its expiry cannot be accepted or rejected.
    fn ensure_not_expired(&self, as_of: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status_as_of(as_of) == QuoteStatus::Expired {
            return Err(DomainError::transition("quote has expired"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("quote already exists"));
        }

        if cmd.header.expiration_date < cmd.header.date {
            return Err(DomainError::validation(
                "expiration_date must not precede quote date",
            ));
        }

        validate_discount_percentage(cmd.header.discount_percentage)?;

        Ok(vec![QuoteEvent::QuoteCreated(QuoteCreated {
            quote_id: cmd.quote_id,
            header: cmd.header.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddQuoteLine) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::transition(
                "lines can only be added to draft quotes",
            ));
        }

        let next_line_no = (self.lines.len() as u32) + 1;
        let line = DocumentLine::new(
            next_line_no,
            cmd.product_id,
            cmd.description.clone(),
            cmd.quantity,
            cmd.unit_price,
            cmd.tax_rate,
        )?;

        Ok(vec![QuoteEvent::QuoteLineAdded(QuoteLineAdded {
            quote_id: cmd.quote_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if self.status != QuoteStatus::Draft {
            return Err(DomainError::transition("only draft quotes can be sent"));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot send a quote without lines"));
        }

        Ok(vec![QuoteEvent::QuoteSent(QuoteSent {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if self.status != QuoteStatus::Sent {
            return Err(DomainError::transition("only sent quotes can be accepted"));
        }
        self.ensure_not_expired(cmd.occurred_at)?;

        Ok(vec![QuoteEvent::QuoteAccepted(QuoteAccepted {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if self.status != QuoteStatus::Sent {
            return Err(DomainError::transition("only sent quotes can be rejected"));
        }
        self.ensure_not_expired(cmd.occurred_at)?;

        Ok(vec![QuoteEvent::QuoteRejected(QuoteRejected {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_expired(&self, cmd: &MarkQuoteExpired) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if self.status != QuoteStatus::Sent || self.status_as_of(cmd.occurred_at) != QuoteStatus::Expired {
            return Err(DomainError::transition(
                "only sent quotes past their expiration date can expire",
            ));
        }

        Ok(vec![QuoteEvent::QuoteExpired(QuoteExpired {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        match self.status {
            QuoteStatus::Draft | QuoteStatus::Sent | QuoteStatus::Expired => {}
            QuoteStatus::Accepted | QuoteStatus::Rejected | QuoteStatus::Cancelled => {
                return Err(DomainError::transition(
                    "terminal quotes cannot be cancelled",
                ));
            }
        }

        Ok(vec![QuoteEvent::QuoteCancelled(QuoteCancelled {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_converted(
        &self,
        cmd: &MarkQuoteConverted,
    ) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_quote_id(cmd.quote_id)?;

        if self.converted_to.is_some() {
            return Err(DomainError::AlreadyConverted);
        }

        if self.status != QuoteStatus::Accepted {
            return Err(DomainError::transition(
                "only accepted quotes can be converted to orders",
            ));
        }

        Ok(vec![QuoteEvent::QuoteConverted(QuoteConverted {
            quote_id: cmd.quote_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
