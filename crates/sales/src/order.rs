use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use billflow_core::{
    Aggregate, AggregateRoot, CompanyId, ContactId, DomainError, Event, InvoiceId, OrderId,
    ProductId, QuoteId, ValueObject,
};
use billflow_pricing::{
    Currency, DocumentLine, Totals, compute_totals, validate_discount_percentage,
};

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    InProgress,
    Delivered,
    Cancelled,
}

/// Immutable header data of a sales order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub company_id: CompanyId,
    pub contact_id: ContactId,
    pub date: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
    pub currency: Currency,
    /// Document-level discount in percent, within [0, 100].
    pub discount_percentage: Decimal,
    pub is_tax_exempt: bool,
}

impl ValueObject for OrderHeader {}

/// A deposit invoice billed against this order, by id and taxed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInvoiceRef {
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
}

impl ValueObject for DepositInvoiceRef {}

/// Aggregate root: SalesOrder.
///
/// A confirmed commitment, tracking partial invoicing via deposits and the
/// one-shot final invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: OrderId,
    quote_id: Option<QuoteId>,
    header: Option<OrderHeader>,
    status: SalesOrderStatus,
    lines: Vec<DocumentLine>,
    deposit_invoices: Vec<DepositInvoiceRef>,
    final_invoice_id: Option<InvoiceId>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            quote_id: None,
            header: None,
            status: SalesOrderStatus::Draft,
            lines: Vec::new(),
            deposit_invoices: Vec::new(),
            final_invoice_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn quote_id(&self) -> Option<QuoteId> {
        self.quote_id
    }

    pub fn header(&self) -> Option<&OrderHeader> {
        self.header.as_ref()
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn deposit_invoices(&self) -> &[DepositInvoiceRef] {
        &self.deposit_invoices
    }

    pub fn final_invoice_id(&self) -> Option<InvoiceId> {
        self.final_invoice_id
    }

    /// Totals are always recomputed from lines, never stored.
    pub fn totals(&self) -> Totals {
        match &self.header {
            Some(h) => compute_totals(&self.lines, h.discount_percentage, h.is_tax_exempt),
            None => Totals::ZERO,
        }
    }

    /// Sum of the deposit invoices billed so far; never exceeds the total.
    pub fn deposit_total(&self) -> Decimal {
        self.deposit_invoices.iter().map(|d| d.amount).sum()
    }

    /// What the final invoice may bill, for reconciliation.
    pub fn remaining_amount(&self) -> Decimal {
        self.totals().total - self.deposit_total()
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SalesOrderStatus::Draft)
    }

    pub fn can_create_deposit_invoice(&self) -> bool {
        self.status == SalesOrderStatus::Confirmed
            && self.final_invoice_id.is_none()
            && self.deposit_total() < self.totals().total
    }

    pub fn can_create_final_invoice(&self) -> bool {
        self.status == SalesOrderStatus::Confirmed && self.final_invoice_id.is_none()
    }
}

impl AggregateRoot for SalesOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
///
/// `lines` is non-empty when the order is derived from an accepted quote
/// (copied lines); a directly created order starts empty and gains lines in
/// draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub quote_id: Option<QuoteId>,
    pub header: OrderHeader,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddOrderLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOrderLine {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartFulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFulfillment {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachDepositInvoice.
///
/// Records a deposit invoice billed against this order. `amount` is the
/// deposit invoice's taxed total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachDepositInvoice {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachFinalInvoice (one-shot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachFinalInvoice {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateOrder(CreateOrder),
    AddOrderLine(AddOrderLine),
    ConfirmOrder(ConfirmOrder),
    StartFulfillment(StartFulfillment),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
    AttachDepositInvoice(AttachDepositInvoice),
    AttachFinalInvoice(AttachFinalInvoice),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub quote_id: Option<QuoteId>,
    pub header: OrderHeader,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineAdded {
    pub order_id: OrderId,
    pub line: DocumentLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderFulfillmentStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFulfillmentStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DepositInvoiceAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInvoiceAttached {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FinalInvoiceAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalInvoiceAttached {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    OrderCreated(OrderCreated),
    OrderLineAdded(OrderLineAdded),
    OrderConfirmed(OrderConfirmed),
    OrderFulfillmentStarted(OrderFulfillmentStarted),
    OrderDelivered(OrderDelivered),
    OrderCancelled(OrderCancelled),
    DepositInvoiceAttached(DepositInvoiceAttached),
    FinalInvoiceAttached(FinalInvoiceAttached),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::OrderCreated(_) => "sales.order.created",
            SalesOrderEvent::OrderLineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::OrderFulfillmentStarted(_) => "sales.order.fulfillment_started",
            SalesOrderEvent::OrderDelivered(_) => "sales.order.delivered",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
            SalesOrderEvent::DepositInvoiceAttached(_) => "sales.order.deposit_invoice_attached",
            SalesOrderEvent::FinalInvoiceAttached(_) => "sales.order.final_invoice_attached",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::OrderCreated(e) => e.occurred_at,
            SalesOrderEvent::OrderLineAdded(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::OrderFulfillmentStarted(e) => e.occurred_at,
            SalesOrderEvent::OrderDelivered(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
            SalesOrderEvent::DepositInvoiceAttached(e) => e.occurred_at,
            SalesOrderEvent::FinalInvoiceAttached(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.quote_id = e.quote_id;
                self.header = Some(e.header.clone());
                self.status = SalesOrderStatus::Draft;
                self.lines = e.lines.clone();
                self.deposit_invoices.clear();
                self.final_invoice_id = None;
                self.created = true;
            }
            SalesOrderEvent::OrderLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            SalesOrderEvent::OrderConfirmed(_) => {
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::OrderFulfillmentStarted(_) => {
                self.status = SalesOrderStatus::InProgress;
            }
            SalesOrderEvent::OrderDelivered(_) => {
                self.status = SalesOrderStatus::Delivered;
            }
            SalesOrderEvent::OrderCancelled(_) => {
                self.status = SalesOrderStatus::Cancelled;
            }
            SalesOrderEvent::DepositInvoiceAttached(e) => {
                self.deposit_invoices.push(DepositInvoiceRef {
                    invoice_id: e.invoice_id,
                    amount: e.amount,
                });
            }
            SalesOrderEvent::FinalInvoiceAttached(e) => {
                self.final_invoice_id = Some(e.invoice_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddOrderLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::StartFulfillment(cmd) => self.handle_start_fulfillment(cmd),
            SalesOrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            SalesOrderCommand::AttachDepositInvoice(cmd) => self.handle_attach_deposit(cmd),
            SalesOrderCommand::AttachFinalInvoice(cmd) => self.handle_attach_final(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::validation("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }

        if cmd.header.delivery_date < cmd.header.date {
            return Err(DomainError::validation(
                "delivery_date must not precede order date",
            ));
        }

        validate_discount_percentage(cmd.header.discount_percentage)?;

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

        Ok(vec![SalesOrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            quote_id: cmd.quote_id,
            header: cmd.header.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddOrderLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::transition(
                "lines can only be added to draft orders",
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

        Ok(vec![SalesOrderEvent::OrderLineAdded(OrderLineAdded {
            order_id: cmd.order_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::transition("only draft orders can be confirmed"));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot confirm an order without lines",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_fulfillment(
        &self,
        cmd: &StartFulfillment,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::transition(
                "only confirmed orders can start fulfillment",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderFulfillmentStarted(
            OrderFulfillmentStarted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_delivered(
        &self,
        cmd: &MarkDelivered,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != SalesOrderStatus::InProgress {
            return Err(DomainError::transition(
                "only in-progress orders can be delivered",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderDelivered(OrderDelivered {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        // A fully invoiced order is never cancelled; its invoices are credited.
        if self.final_invoice_id.is_some() {
            return Err(DomainError::HasFinalInvoice);
        }

        match self.status {
            SalesOrderStatus::Draft | SalesOrderStatus::Confirmed | SalesOrderStatus::InProgress => {
            }
            SalesOrderStatus::Delivered | SalesOrderStatus::Cancelled => {
                return Err(DomainError::transition(
                    "delivered or cancelled orders cannot be cancelled",
                ));
            }
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_deposit(
        &self,
        cmd: &AttachDepositInvoice,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.final_invoice_id.is_some() {
            return Err(DomainError::AlreadyInvoiced);
        }

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::transition(
                "deposit invoices require a confirmed order",
            ));
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("deposit amount must be positive"));
        }

        if self.deposit_total() + cmd.amount > self.totals().total {
            return Err(DomainError::DepositExceedsTotal);
        }

        Ok(vec![SalesOrderEvent::DepositInvoiceAttached(
            DepositInvoiceAttached {
                order_id: cmd.order_id,
                invoice_id: cmd.invoice_id,
                amount: cmd.amount,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_attach_final(
        &self,
        cmd: &AttachFinalInvoice,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.final_invoice_id.is_some() {
            return Err(DomainError::AlreadyInvoiced);
        }

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::transition(
                "final invoices require a confirmed order",
            ));
        }

        Ok(vec![SalesOrderEvent::FinalInvoiceAttached(
            FinalInvoiceAttached {
                order_id: cmd.order_id,
                invoice_id: cmd.invoice_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::AggregateId;
    use chrono::TimeZone;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, d, 12, 0, 0).unwrap()
    }

    fn test_header() -> OrderHeader {
        OrderHeader {
            company_id: CompanyId::new(),
            contact_id: ContactId::new(),
            date: day(1),
            delivery_date: day(20),
            currency: Currency::new("EUR").unwrap(),
            discount_percentage: Decimal::ZERO,
            is_tax_exempt: true,
        }
    }

    fn test_line(line_no: u32, qty: i64, price: i64) -> DocumentLine {
        DocumentLine::new(
            line_no,
            ProductId::new(),
            "Widget",
            Decimal::from(qty),
            Decimal::from(price),
            Decimal::ZERO,
        )
        .unwrap()
    }

    /// Order with a single 1000.00 line, tax exempt, no discount.
    fn confirmed_order(order_id: OrderId) -> SalesOrder {
        let mut order = SalesOrder::empty(order_id);
        let events = order
            .handle(&SalesOrderCommand::CreateOrder(CreateOrder {
                order_id,
                quote_id: None,
                header: test_header(),
                lines: vec![test_line(1, 1, 1000)],
                occurred_at: day(1),
            }))
            .unwrap();
        order.apply(&events[0]);

        let events = order
            .handle(&SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                occurred_at: day(2),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    fn attach_deposit(order: &mut SalesOrder, amount: i64) -> Result<(), DomainError> {
        let events = order.handle(&SalesOrderCommand::AttachDepositInvoice(
            AttachDepositInvoice {
                order_id: order.id_typed(),
                invoice_id: test_invoice_id(),
                amount: Decimal::from(amount),
                occurred_at: day(3),
            },
        ))?;
        order.apply(&events[0]);
        Ok(())
    }

    #[test]
    fn create_order_copies_provided_lines() {
        let order_id = test_order_id();
        let order = confirmed_order(order_id);

        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.totals().total, Decimal::from(1000));
    }

    #[test]
    fn cannot_confirm_order_without_lines() {
        let order_id = test_order_id();
        let mut order = SalesOrder::empty(order_id);
        let events = order
            .handle(&SalesOrderCommand::CreateOrder(CreateOrder {
                order_id,
                quote_id: None,
                header: test_header(),
                lines: vec![],
                occurred_at: day(1),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                occurred_at: day(2),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn lines_are_frozen_after_confirmation() {
        let order_id = test_order_id();
        let order = confirmed_order(order_id);

        let err = order
            .handle(&SalesOrderCommand::AddOrderLine(AddOrderLine {
                order_id,
                product_id: ProductId::new(),
                description: "Extra".to_string(),
                quantity: Decimal::ONE,
                unit_price: Decimal::from(10),
                tax_rate: Decimal::ZERO,
                occurred_at: day(3),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn full_lifecycle_to_delivered() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);

        let events = order
            .handle(&SalesOrderCommand::StartFulfillment(StartFulfillment {
                order_id,
                occurred_at: day(5),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), SalesOrderStatus::InProgress);

        let events = order
            .handle(&SalesOrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at: day(20),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), SalesOrderStatus::Delivered);
    }

    #[test]
    fn deposit_invoices_accumulate_up_to_the_total() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);

        attach_deposit(&mut order, 300).unwrap();
        assert_eq!(order.deposit_total(), Decimal::from(300));
        assert_eq!(order.remaining_amount(), Decimal::from(700));
        assert!(order.can_create_deposit_invoice());

        // 300 + 800 > 1000.
        let err = attach_deposit(&mut order, 800).unwrap_err();
        assert_eq!(err, DomainError::DepositExceedsTotal);

        // Exactly reaching the total is allowed, after which no more deposits.
        attach_deposit(&mut order, 700).unwrap();
        assert_eq!(order.remaining_amount(), Decimal::ZERO);
        assert!(!order.can_create_deposit_invoice());
    }

    #[test]
    fn deposit_requires_confirmed_order() {
        let order_id = test_order_id();
        let mut order = SalesOrder::empty(order_id);
        let events = order
            .handle(&SalesOrderCommand::CreateOrder(CreateOrder {
                order_id,
                quote_id: None,
                header: test_header(),
                lines: vec![test_line(1, 1, 1000)],
                occurred_at: day(1),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = attach_deposit(&mut order, 300).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn final_invoice_is_one_shot() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);
        let invoice_id = test_invoice_id();

        let events = order
            .handle(&SalesOrderCommand::AttachFinalInvoice(AttachFinalInvoice {
                order_id,
                invoice_id,
                occurred_at: day(4),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.final_invoice_id(), Some(invoice_id));
        assert!(!order.can_create_final_invoice());

        let err = order
            .handle(&SalesOrderCommand::AttachFinalInvoice(AttachFinalInvoice {
                order_id,
                invoice_id: test_invoice_id(),
                occurred_at: day(5),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::AlreadyInvoiced);
    }

    #[test]
    fn no_deposits_once_final_invoice_exists() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);

        let events = order
            .handle(&SalesOrderCommand::AttachFinalInvoice(AttachFinalInvoice {
                order_id,
                invoice_id: test_invoice_id(),
                occurred_at: day(4),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = attach_deposit(&mut order, 100).unwrap_err();
        assert_eq!(err, DomainError::AlreadyInvoiced);
    }

    #[test]
    fn cancellation_is_blocked_by_a_final_invoice() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);

        let events = order
            .handle(&SalesOrderCommand::AttachFinalInvoice(AttachFinalInvoice {
                order_id,
                invoice_id: test_invoice_id(),
                occurred_at: day(4),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: day(5),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::HasFinalInvoice);
    }

    #[test]
    fn delivered_order_cannot_be_cancelled() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);

        for cmd in [
            SalesOrderCommand::StartFulfillment(StartFulfillment {
                order_id,
                occurred_at: day(5),
            }),
            SalesOrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at: day(20),
            }),
        ] {
            let events = order.handle(&cmd).unwrap();
            order.apply(&events[0]);
        }

        let err = order
            .handle(&SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: day(21),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn confirmed_order_can_be_cancelled_before_invoicing() {
        let order_id = test_order_id();
        let mut order = confirmed_order(order_id);
        attach_deposit(&mut order, 300).unwrap();

        let events = order
            .handle(&SalesOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: day(6),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), SalesOrderStatus::Cancelled);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order_id = test_order_id();
        let order = confirmed_order(order_id);
        let before = order.clone();

        let cmd = SalesOrderCommand::AttachDepositInvoice(AttachDepositInvoice {
            order_id,
            invoice_id: test_invoice_id(),
            amount: Decimal::from(250),
            occurred_at: day(3),
        });
        let events1 = order.handle(&cmd).unwrap();
        let events2 = order.handle(&cmd).unwrap();

        assert_eq!(order, before);
        assert_eq!(events1, events2);
    }
}
