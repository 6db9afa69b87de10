//! Integration tests for the full document lifecycle pipeline.
//!
//! Drives quote → order → invoice → payment → credit-note journeys through
//! the coordinator against the in-memory store, and verifies that
//! cross-document operations are atomic and one-shot under concurrency.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use billflow_core::{
        AggregateId, CompanyId, ContactId, InvoiceId, OrderId, PaymentId, ProductId, QuoteId,
    };
    use billflow_invoicing::{InvoiceKind, PaymentMethod, PaymentStatus};
    use billflow_pricing::Currency;
    use billflow_sales::{OrderHeader, QuoteHeader, QuoteStatus, SalesOrderStatus};

    use crate::coordinator::{CoordinatorError, LifecycleCoordinator};
    use crate::store::InMemoryDocumentStore;

    fn setup() -> LifecycleCoordinator<Arc<InMemoryDocumentStore>> {
        billflow_observability::init();
        LifecycleCoordinator::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, 12, 0, 0).unwrap()
    }

    fn quote_id() -> QuoteId {
        QuoteId::new(AggregateId::new())
    }

    fn order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn payment_id() -> PaymentId {
        PaymentId::new(AggregateId::new())
    }

    fn quote_header() -> QuoteHeader {
        QuoteHeader {
            company_id: CompanyId::new(),
            contact_id: ContactId::new(),
            date: day(1),
            expiration_date: day(15),
            currency: Currency::new("EUR").unwrap(),
            discount_percentage: Decimal::from(10),
            is_tax_exempt: false,
        }
    }

    fn order_header() -> OrderHeader {
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

    /// An accepted quote: 2 x 100 at 20% tax, 10% discount (total 216).
    fn accepted_quote(
        coordinator: &LifecycleCoordinator<Arc<InMemoryDocumentStore>>,
    ) -> QuoteId {
        let qid = quote_id();
        coordinator
            .create_quote(qid, quote_header(), day(1))
            .unwrap();
        coordinator
            .add_quote_line(
                qid,
                ProductId::new(),
                "Widget",
                Decimal::from(2),
                Decimal::from(100),
                Decimal::from(20),
                day(1),
            )
            .unwrap();
        coordinator.send_quote(qid, day(2)).unwrap();
        coordinator.accept_quote(qid, day(3)).unwrap();
        qid
    }

    /// A confirmed direct order with a single tax-exempt 1000.00 line.
    fn confirmed_order(
        coordinator: &LifecycleCoordinator<Arc<InMemoryDocumentStore>>,
    ) -> OrderId {
        let oid = order_id();
        coordinator.create_order(oid, order_header(), day(1)).unwrap();
        coordinator
            .add_order_line(
                oid,
                ProductId::new(),
                "Service",
                Decimal::ONE,
                Decimal::from(1000),
                Decimal::ZERO,
                day(1),
            )
            .unwrap();
        coordinator.confirm_order(oid, day(2)).unwrap();
        oid
    }

    #[test]
    fn quote_to_order_copies_lines_and_totals() {
        let coordinator = setup();
        let qid = accepted_quote(&coordinator);
        let oid = order_id();

        let order = coordinator
            .convert_quote_to_order(qid, oid, day(20), day(4))
            .unwrap();

        assert_eq!(order.quote_id(), Some(qid));
        assert_eq!(order.status(), SalesOrderStatus::Draft);
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.totals().total, Decimal::from(216));

        // The quote remains an immutable record, now marked converted.
        let quote = coordinator.get_quote(qid).unwrap();
        assert_eq!(quote.status(), QuoteStatus::Accepted);
        assert_eq!(quote.converted_to(), Some(oid));
        assert_eq!(quote.lines().len(), 1);
    }

    #[test]
    fn converting_the_same_quote_twice_fails() {
        let coordinator = setup();
        let qid = accepted_quote(&coordinator);

        coordinator
            .convert_quote_to_order(qid, order_id(), day(20), day(4))
            .unwrap();
        let err = coordinator
            .convert_quote_to_order(qid, order_id(), day(20), day(5))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyConverted));
    }

    #[test]
    fn failed_conversion_writes_nothing() {
        let coordinator = setup();
        let qid = quote_id();
        coordinator
            .create_quote(qid, quote_header(), day(1))
            .unwrap();
        let oid = order_id();

        // Draft quote: conversion is an invalid transition, and no order
        // stream may be left behind.
        let err = coordinator
            .convert_quote_to_order(qid, oid, day(20), day(2))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition(_)));
        assert!(matches!(
            coordinator.get_order(oid).unwrap_err(),
            CoordinatorError::NotFound
        ));
    }

    #[test]
    fn expired_quote_cannot_be_accepted() {
        let coordinator = setup();
        let qid = quote_id();
        coordinator
            .create_quote(qid, quote_header(), day(1))
            .unwrap();
        coordinator
            .add_quote_line(
                qid,
                ProductId::new(),
                "Widget",
                Decimal::ONE,
                Decimal::from(100),
                Decimal::ZERO,
                day(1),
            )
            .unwrap();
        coordinator.send_quote(qid, day(2)).unwrap();

        let err = coordinator.accept_quote(qid, day(16)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition(_)));

        let quote = coordinator.expire_quote(qid, day(16)).unwrap();
        assert_eq!(quote.status(), QuoteStatus::Expired);
    }

    #[test]
    fn direct_order_reaches_delivered() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);

        let order = coordinator.start_fulfillment(oid, day(3)).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::InProgress);

        let order = coordinator.mark_delivered(oid, day(20)).unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Delivered);
    }

    #[test]
    fn deposit_invoice_bills_a_percentage_of_the_order() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();

        let invoice = coordinator
            .create_deposit_invoice(oid, iid, Decimal::from(30), day(15), day(3))
            .unwrap();

        assert_eq!(invoice.kind(), InvoiceKind::Deposit);
        assert_eq!(invoice.order_id(), Some(oid));
        assert_eq!(invoice.total(), Decimal::new(30000, 2));
        assert_eq!(invoice.lines().len(), 1);
        assert_eq!(invoice.lines()[0].product_id, None);

        let order = coordinator.get_order(oid).unwrap();
        assert_eq!(order.deposit_total(), Decimal::new(30000, 2));
        assert_eq!(order.remaining_amount(), Decimal::new(70000, 2));
    }

    #[test]
    fn deposits_may_not_exceed_the_order_total() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);

        coordinator
            .create_deposit_invoice(oid, invoice_id(), Decimal::from(30), day(15), day(3))
            .unwrap();

        // 300 + 800 > 1000.
        let err = coordinator
            .create_deposit_invoice(oid, invoice_id(), Decimal::from(80), day(15), day(4))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::DepositExceedsTotal));

        let order = coordinator.get_order(oid).unwrap();
        assert_eq!(order.deposit_invoices().len(), 1);
    }

    #[test]
    fn deposit_percentage_is_validated_up_front() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);

        for pct in [Decimal::ZERO, Decimal::from(-5), Decimal::from(101)] {
            let err = coordinator
                .create_deposit_invoice(oid, invoice_id(), pct, day(15), day(3))
                .unwrap_err();
            assert!(matches!(err, CoordinatorError::Validation(_)));
        }
    }

    #[test]
    fn final_invoice_copies_lines_and_reports_remaining_amount() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        coordinator
            .create_deposit_invoice(oid, invoice_id(), Decimal::from(30), day(15), day(3))
            .unwrap();

        let outcome = coordinator
            .convert_order_to_invoice(oid, invoice_id(), day(30), day(4))
            .unwrap();

        // Lines are copied verbatim; the invoice is payable in full.
        // Deposits reduce the order's aggregate position, not this invoice.
        assert_eq!(outcome.invoice.kind(), InvoiceKind::Standard);
        assert_eq!(outcome.invoice.lines().len(), 1);
        assert_eq!(outcome.invoice.total(), Decimal::from(1000));
        assert_eq!(outcome.invoice.amount_due(), Decimal::from(1000));
        assert_eq!(outcome.remaining_amount, Decimal::new(70000, 2));
    }

    #[test]
    fn final_invoice_is_one_shot_and_blocks_cancellation() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);

        coordinator
            .convert_order_to_invoice(oid, invoice_id(), day(30), day(4))
            .unwrap();

        let err = coordinator
            .convert_order_to_invoice(oid, invoice_id(), day(30), day(5))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyInvoiced));

        let err = coordinator.cancel_order(oid, day(5)).unwrap_err();
        assert!(matches!(err, CoordinatorError::HasFinalInvoice));

        // No further deposits either.
        let err = coordinator
            .create_deposit_invoice(oid, invoice_id(), Decimal::from(10), day(15), day(5))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyInvoiced));
    }

    #[test]
    fn payment_journey_partial_paid_and_back() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();

        let invoice = coordinator
            .register_payment(
                iid,
                payment_id(),
                Decimal::from(400),
                day(5),
                PaymentMethod::BankTransfer,
                day(5),
            )
            .unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Partial);
        assert_eq!(invoice.amount_due(), Decimal::from(600));

        let settling = payment_id();
        let invoice = coordinator
            .register_payment(
                iid,
                settling,
                Decimal::from(600),
                day(6),
                PaymentMethod::Card,
                day(6),
            )
            .unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.amount_due(), Decimal::ZERO);

        let invoice = coordinator.delete_payment(iid, settling, day(7)).unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Partial);
        assert_eq!(invoice.amount_due(), Decimal::from(600));
        assert_eq!(invoice.payments().len(), 1);
    }

    #[test]
    fn mark_paid_is_idempotent() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();

        let invoice = coordinator
            .mark_invoice_paid(iid, payment_id(), PaymentMethod::BankTransfer, day(5))
            .unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.payments().len(), 1);

        // Second call records no second payment.
        let invoice = coordinator
            .mark_invoice_paid(iid, payment_id(), PaymentMethod::BankTransfer, day(6))
            .unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.payments().len(), 1);
    }

    #[test]
    fn cancelled_invoice_blocks_payments() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();

        coordinator
            .cancel_invoice(iid, Some("ordered in error".to_string()), day(5))
            .unwrap();

        let err = coordinator
            .register_payment(
                iid,
                payment_id(),
                Decimal::from(100),
                day(6),
                PaymentMethod::Cash,
                day(6),
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition(_)));
    }

    #[test]
    fn partial_credit_note_leaves_parent_due_unchanged() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();
        coordinator
            .register_payment(
                iid,
                payment_id(),
                Decimal::from(500),
                day(5),
                PaymentMethod::BankTransfer,
                day(5),
            )
            .unwrap();

        let cid = invoice_id();
        let credit = coordinator
            .create_credit_note(iid, cid, Decimal::from(200), "damaged goods", day(6))
            .unwrap();

        assert_eq!(credit.kind(), InvoiceKind::CreditNote);
        assert_eq!(credit.parent_invoice_id(), Some(iid));
        assert_eq!(credit.total(), Decimal::from(200));
        assert_eq!(credit.lines()[0].description, "damaged goods");

        let parent = coordinator.get_invoice(iid).unwrap();
        assert_eq!(parent.payment_status(), PaymentStatus::Partial);
        assert_eq!(parent.amount_due(), Decimal::from(500));
        assert_eq!(parent.credit_notes().len(), 1);
    }

    #[test]
    fn full_credit_note_voids_the_parent() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();
        coordinator
            .mark_invoice_paid(iid, payment_id(), PaymentMethod::BankTransfer, day(5))
            .unwrap();

        coordinator
            .create_credit_note(iid, invoice_id(), Decimal::from(1000), "full refund", day(6))
            .unwrap();

        let parent = coordinator.get_invoice(iid).unwrap();
        assert_eq!(parent.payment_status(), PaymentStatus::Cancelled);
    }

    #[test]
    fn credit_note_guards() {
        let coordinator = setup();
        let oid = confirmed_order(&coordinator);
        let iid = invoice_id();
        coordinator
            .convert_order_to_invoice(oid, iid, day(30), day(4))
            .unwrap();

        // Unpaid parent cannot be credited.
        let err = coordinator
            .create_credit_note(iid, invoice_id(), Decimal::from(100), "too early", day(5))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition(_)));

        coordinator
            .register_payment(
                iid,
                payment_id(),
                Decimal::from(500),
                day(5),
                PaymentMethod::BankTransfer,
                day(5),
            )
            .unwrap();

        // Amount above the parent total is out of range, and the failed
        // attempt must not leave a credit-note stream behind.
        let cid = invoice_id();
        let err = coordinator
            .create_credit_note(iid, cid, Decimal::from(1500), "too much", day(6))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::CreditAmountOutOfRange));
        assert!(matches!(
            coordinator.get_invoice(cid).unwrap_err(),
            CoordinatorError::NotFound
        ));
    }

    #[test]
    fn concurrent_final_invoicing_has_exactly_one_winner() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let coordinator = LifecycleCoordinator::new(store.clone());
        let oid = confirmed_order(&coordinator);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let coordinator = LifecycleCoordinator::new(store);
                coordinator.convert_order_to_invoice(
                    oid,
                    InvoiceId::new(AggregateId::new()),
                    Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2026, 6, 4, 12, 0, 0).unwrap(),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results {
            if let Err(err) = result {
                assert!(matches!(err, CoordinatorError::AlreadyInvoiced));
            }
        }

        let order = coordinator.get_order(oid).unwrap();
        assert!(order.final_invoice_id().is_some());
    }
}
