use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use billflow_core::{
    AggregateId, CompanyId, ContactId, InvoiceId, OrderId, PaymentId, ProductId, QuoteId,
};
use billflow_invoicing::PaymentMethod;
use billflow_lifecycle::{InMemoryDocumentStore, LifecycleCoordinator};
use billflow_pricing::{Currency, DocumentLine, compute_totals};
use billflow_sales::{OrderHeader, QuoteHeader};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, d, 12, 0, 0).unwrap()
}

fn quote_header() -> QuoteHeader {
    QuoteHeader {
        company_id: CompanyId::new(),
        contact_id: ContactId::new(),
        date: day(1),
        expiration_date: day(28),
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
        delivery_date: day(28),
        currency: Currency::new("EUR").unwrap(),
        discount_percentage: Decimal::from(10),
        is_tax_exempt: false,
    }
}

fn lines(count: usize) -> Vec<DocumentLine> {
    (0..count)
        .map(|i| {
            DocumentLine::new(
                (i + 1) as u32,
                ProductId::new(),
                "Widget",
                Decimal::from((i % 7 + 1) as i64),
                Decimal::new(999 + i as i64, 2),
                Decimal::from((i % 3 * 10) as i64),
            )
            .unwrap()
        })
        .collect()
}

fn bench_compute_totals(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_totals");
    for count in [1usize, 10, 100] {
        let line_set = lines(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &line_set, |b, ls| {
            b.iter(|| compute_totals(black_box(ls), Decimal::from(10), false));
        });
    }
    group.finish();
}

fn bench_quote_to_paid_invoice(c: &mut Criterion) {
    c.bench_function("quote_to_paid_invoice", |b| {
        b.iter(|| {
            let coordinator = LifecycleCoordinator::new(Arc::new(InMemoryDocumentStore::new()));
            let quote_id = QuoteId::new(AggregateId::new());
            let order_id = OrderId::new(AggregateId::new());
            let invoice_id = InvoiceId::new(AggregateId::new());

            coordinator
                .create_quote(quote_id, quote_header(), day(1))
                .unwrap();
            coordinator
                .add_quote_line(
                    quote_id,
                    ProductId::new(),
                    "Widget",
                    Decimal::from(2),
                    Decimal::from(100),
                    Decimal::from(20),
                    day(1),
                )
                .unwrap();
            coordinator.send_quote(quote_id, day(2)).unwrap();
            coordinator.accept_quote(quote_id, day(3)).unwrap();
            coordinator
                .convert_quote_to_order(quote_id, order_id, day(28), day(4))
                .unwrap();
            coordinator.confirm_order(order_id, day(5)).unwrap();
            coordinator
                .convert_order_to_invoice(order_id, invoice_id, day(28), day(6))
                .unwrap();
            coordinator
                .mark_invoice_paid(
                    invoice_id,
                    PaymentId::new(AggregateId::new()),
                    PaymentMethod::BankTransfer,
                    day(7),
                )
                .unwrap();

            black_box(coordinator.get_invoice(invoice_id).unwrap())
        });
    });
}

fn bench_payment_on_deep_stream(c: &mut Criterion) {
    // Rehydration cost grows with stream depth; measure a payment against an
    // invoice that already carries a long payment history.
    let coordinator = LifecycleCoordinator::new(Arc::new(InMemoryDocumentStore::new()));
    let order_id = OrderId::new(AggregateId::new());
    let invoice_id = InvoiceId::new(AggregateId::new());

    coordinator
        .create_order(order_id, order_header(), day(1))
        .unwrap();
    coordinator
        .add_order_line(
            order_id,
            ProductId::new(),
            "Service",
            Decimal::ONE,
            Decimal::from(1_000_000),
            Decimal::ZERO,
            day(1),
        )
        .unwrap();
    coordinator.confirm_order(order_id, day(2)).unwrap();
    coordinator
        .convert_order_to_invoice(order_id, invoice_id, day(28), day(3))
        .unwrap();
    for _ in 0..100 {
        coordinator
            .register_payment(
                invoice_id,
                PaymentId::new(AggregateId::new()),
                Decimal::ONE,
                day(4),
                PaymentMethod::BankTransfer,
                day(4),
            )
            .unwrap();
    }

    c.bench_function("payment_on_deep_stream", |b| {
        b.iter(|| {
            let payment_id = PaymentId::new(AggregateId::new());
            coordinator
                .register_payment(
                    invoice_id,
                    payment_id,
                    Decimal::ONE,
                    day(5),
                    PaymentMethod::Card,
                    day(5),
                )
                .unwrap();
            coordinator.delete_payment(invoice_id, payment_id, day(5)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_compute_totals,
    bench_quote_to_paid_invoice,
    bench_payment_on_deep_stream
);
criterion_main!(benches);
