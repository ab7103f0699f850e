use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use order_matching_engine::orderbook::types::{Order, Side};
use order_matching_engine::orderbook::OrderBook;
use order_matching_engine::utils::time::MonotonicClock;

fn seeded_book(levels: u64, per_level: u64) -> (OrderBook, Arc<MonotonicClock>) {
    let clock = Arc::new(MonotonicClock::starting_at(1 << 60));
    let book = OrderBook::new("BENCH", Arc::clone(&clock));
    for level in 0..levels {
        for _ in 0..per_level {
            let bid = Order::limit("maker", "BENCH", Side::Buy, 9_900 - level * 10, 100, &clock)
                .unwrap();
            let ask = Order::limit("maker", "BENCH", Side::Sell, 10_100 + level * 10, 100, &clock)
                .unwrap();
            book.add_order(bid).unwrap();
            book.add_order(ask).unwrap();
        }
    }
    (book, clock)
}

fn bench_rest_limit_order(c: &mut Criterion) {
    c.bench_function("rest_limit_order", |b| {
        b.iter_batched(
            || seeded_book(50, 4),
            |(book, clock)| {
                let order =
                    Order::limit("taker", "BENCH", Side::Buy, 9_905, 100, &clock).unwrap();
                black_box(book.add_order(order).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_match_sweep(c: &mut Criterion) {
    c.bench_function("match_sweep_five_levels", |b| {
        b.iter_batched(
            || seeded_book(50, 4),
            |(book, clock)| {
                // crosses five ask levels
                let order =
                    Order::limit("taker", "BENCH", Side::Buy, 10_140, 2_000, &clock).unwrap();
                black_box(book.add_order(order).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_cancel(c: &mut Criterion) {
    c.bench_function("cancel_resting_order", |b| {
        b.iter_batched(
            || {
                let (book, clock) = seeded_book(50, 4);
                let order =
                    Order::limit("taker", "BENCH", Side::Buy, 9_905, 100, &clock).unwrap();
                let id = order.order_id.clone();
                book.add_order(order).unwrap();
                (book, id)
            },
            |(book, id)| {
                black_box(book.cancel(&id).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_rest_limit_order,
    bench_match_sweep,
    bench_cancel
);
criterion_main!(benches);
