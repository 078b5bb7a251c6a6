//! Benchmarks for book mutations and quote sweeps

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use feedbook::orderbook::{Orderbook, Update};

fn snapshot_updates(levels: usize) -> (Vec<Update>, Vec<Update>) {
    let bids = (0..levels)
        .map(|i| Update::new(format!("{}", 50_000 - i as i64), "1.5"))
        .collect();
    let asks = (0..levels)
        .map(|i| Update::new(format!("{}", 50_001 + i as i64), "1.5"))
        .collect();
    (bids, asks)
}

fn benchmark_apply_snapshot(c: &mut Criterion) {
    let (bids, asks) = snapshot_updates(100);

    c.bench_function("apply_snapshot_100_levels", |b| {
        b.iter(|| {
            let mut book = Orderbook::ungated("BTC-USD");
            book.apply_snapshot(1, black_box(&bids), black_box(&asks));
        })
    });
}

fn benchmark_apply_delta(c: &mut Criterion) {
    let (bids, asks) = snapshot_updates(100);
    let mut book = Orderbook::ungated("BTC-USD");
    book.apply_snapshot(1, &bids, &asks);

    let delta_bids = vec![Update::new("49999", "2.0")];
    let delta_asks = vec![Update::new("50001", "2.5")];

    c.bench_function("apply_delta", |b| {
        b.iter(|| {
            book.apply_delta(1, black_box(&delta_bids), black_box(&delta_asks));
        })
    });
}

fn benchmark_sweeps(c: &mut Criterion) {
    let (bids, asks) = snapshot_updates(100);
    let mut book = Orderbook::ungated("BTC-USD");
    book.apply_snapshot(1, &bids, &asks);

    c.bench_function("sell_base_across_levels", |b| {
        b.iter(|| {
            black_box(book.sell_base(black_box(40.0))).ok();
        })
    });

    c.bench_function("buy_quote_across_levels", |b| {
        b.iter(|| {
            black_box(book.buy_quote(black_box(1_000_000.0))).ok();
        })
    });
}

criterion_group!(
    benches,
    benchmark_apply_snapshot,
    benchmark_apply_delta,
    benchmark_sweeps
);
criterion_main!(benches);
