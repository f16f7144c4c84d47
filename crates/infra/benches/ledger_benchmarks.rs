use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use branchstock_core::{AggregateId, BranchId, ProductId, UserId};
use branchstock_events::{EventEnvelope, InMemoryEventBus};
use branchstock_infra::{
    InMemoryProductCatalog, LedgerContext, MovementJournal, SaleStockIntegrator, StockLedger, TransferWorkflow,
};
use branchstock_inventory::{InitialStock, NegativeStockPolicy};
use branchstock_sales::{SaleId, SaleLine};
use branchstock_transfers::TransferLine;

fn context() -> LedgerContext {
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
    LedgerContext::in_memory(bus, Arc::new(InMemoryProductCatalog::new()))
}

fn seeded(ctx: &LedgerContext, branch: BranchId, products: &[ProductId], quantity: i64, actor: UserId) {
    let items: Vec<InitialStock> = products
        .iter()
        .map(|p| InitialStock {
            product_id: *p,
            quantity,
            min_stock: 0,
        })
        .collect();
    StockLedger::new(ctx.clone()).initialize_branch(branch, &items, actor).unwrap();
}

fn bench_adjust_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjust_latency");
    group.sample_size(1000);

    let ctx = context();
    let ledger = StockLedger::new(ctx.clone());
    let actor = UserId::new();
    let branch = BranchId::new();
    let product = ProductId::new();
    seeded(&ctx, branch, &[product], 1_000_000_000, actor);

    group.bench_function("relative_debit", |b| {
        b.iter(|| {
            ledger
                .adjust_relative(black_box(branch), product, -1, "bench", actor, NegativeStockPolicy::Reject)
                .unwrap()
        })
    });

    group.finish();
}

fn bench_sale_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("sale_debit_lines");

    for lines in [1usize, 5, 20] {
        let ctx = context();
        let sales = SaleStockIntegrator::new(ctx.clone());
        let actor = UserId::new();
        let branch = BranchId::new();
        let products: Vec<ProductId> = (0..lines).map(|_| ProductId::new()).collect();
        seeded(&ctx, branch, &products, 1_000_000_000, actor);
        let sale_lines: Vec<SaleLine> = products.iter().map(|p| SaleLine::new(*p, 1)).collect();

        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &sale_lines, |b, sale_lines| {
            b.iter(|| {
                sales
                    .debit_sale(SaleId::new(AggregateId::new()), branch, black_box(sale_lines), actor)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_transfer_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_lifecycle");

    let ctx = context();
    let transfers = TransferWorkflow::new(ctx.clone());
    let actor = UserId::new();
    let (origin, destination) = (BranchId::new(), BranchId::new());
    let product = ProductId::new();
    seeded(&ctx, origin, &[product], 1_000, actor);

    group.bench_function("request_approve_cancel", |b| {
        b.iter(|| {
            let t = transfers
                .request(origin, destination, vec![TransferLine { product_id: product, quantity: 10 }], "bench", actor)
                .unwrap();
            transfers.approve(t.id, actor).unwrap();
            transfers.cancel(t.id, "bench", actor).unwrap()
        })
    });

    group.finish();
}

fn bench_journal_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_reconstruct");

    for history in [100usize, 1_000, 10_000] {
        let ctx = context();
        let ledger = StockLedger::new(ctx.clone());
        let journal = MovementJournal::new(ctx.clone());
        let actor = UserId::new();
        let branch = BranchId::new();
        let product = ProductId::new();
        seeded(&ctx, branch, &[product], 0, actor);
        for i in 0..history {
            let delta = if i % 2 == 0 { 3 } else { -1 };
            ledger
                .adjust_relative(branch, product, delta, "bench", actor, NegativeStockPolicy::Reject)
                .unwrap();
        }

        group.throughput(Throughput::Elements(history as u64));
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, _| {
            b.iter(|| journal.reconstruct(black_box(branch), product).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_adjust_latency,
    bench_sale_lines,
    bench_transfer_round_trip,
    bench_journal_reconstruct
);
criterion_main!(benches);
