use chrono::Utc;
use common::{Currency, Money, Tenancy};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use domain::{
    ConsumeStock, CostLayers, InventoryLedger, ReceiveStock, ReferenceType, ValuationMethod,
};

fn tenancy() -> Tenancy {
    Tenancy::new("T1", "F1", "W1")
}

fn stocked_ledger(layers: u64) -> InventoryLedger {
    let mut ledger = InventoryLedger::new("SKU-BENCH", tenancy(), Currency::USD, ValuationMethod::Fifo);
    for i in 0..layers {
        ledger
            .record_receiving(&ReceiveStock::new(
                tenancy(),
                "SKU-BENCH",
                10,
                Money::usd(1000 + i as i64),
                "DOCK-1",
                format!("PO-{i}"),
                "bench",
            ))
            .unwrap();
    }
    ledger
}

fn bench_plan_draw(c: &mut Criterion) {
    let mut layers = CostLayers::new();
    for i in 0..1_000 {
        layers.add_cost_layer(10, Money::usd(1000 + i), format!("PO-{i}"), Utc::now());
    }

    c.bench_function("ledger/plan_draw_1000_layers", |b| {
        b.iter(|| layers.plan_draw(5_000, ValuationMethod::Fifo).unwrap());
    });
}

fn bench_record_receiving(c: &mut Criterion) {
    c.bench_function("ledger/record_receiving", |b| {
        b.iter_batched(
            || stocked_ledger(0),
            |mut ledger| {
                ledger
                    .record_receiving(&ReceiveStock::new(
                        tenancy(),
                        "SKU-BENCH",
                        100,
                        Money::usd(1500),
                        "DOCK-1",
                        "PO-1",
                        "bench",
                    ))
                    .unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_record_consumption(c: &mut Criterion) {
    c.bench_function("ledger/consume_across_50_layers", |b| {
        b.iter_batched(
            || stocked_ledger(100),
            |mut ledger| {
                ledger
                    .record_consumption(&ConsumeStock::new(
                        tenancy().scope(),
                        "SKU-BENCH",
                        500,
                        "PICK-1",
                        "SO-1",
                        ReferenceType::SalesOrder,
                        "bench",
                    ))
                    .unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_plan_draw,
    bench_record_receiving,
    bench_record_consumption
);
criterion_main!(benches);
