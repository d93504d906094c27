use criterion::{black_box, criterion_group, criterion_main, Criterion};

use partmark_core::credit::Credit;
use partmark_core::feedback::{FeedbackLedger, FeedbackOp};

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    let flat: Vec<FeedbackOp> = (0..200)
        .map(|i| match i % 4 {
            0 => FeedbackOp::add_credit(Credit::new(1, 400), "step"),
            1 => FeedbackOp::sub_credit(Credit::new(1, 800), "slip"),
            2 => FeedbackOp::feedback("note"),
            _ => FeedbackOp::multiply_credit(Credit::new(99, 100), "scaled"),
        })
        .collect();

    // Ten gaps of twenty ops each, as a gap-fill part produces.
    let lifted: Vec<FeedbackOp> = (0..10)
        .flat_map(|_| {
            let gap: Vec<FeedbackOp> = (0..20)
                .map(|_| FeedbackOp::add_credit(Credit::new(1, 20), "gap step"))
                .collect();
            FeedbackOp::concat(gap, Credit::new(1, 10))
        })
        .collect();

    let nested: Vec<FeedbackOp> = {
        let mut ops = vec![FeedbackOp::set_credit(Credit::ONE, None, "base")];
        for depth in 0..30 {
            ops = FeedbackOp::concat(ops, Credit::new(depth + 1, depth + 2));
        }
        ops
    };

    let ledger = FeedbackLedger::new(10);

    group.bench_function("flat_200", |b| b.iter(|| ledger.replay(black_box(&flat))));
    group.bench_function("ten_gaps", |b| b.iter(|| ledger.replay(black_box(&lifted))));
    group.bench_function("nested_30", |b| b.iter(|| ledger.replay(black_box(&nested))));

    group.finish();
}

fn bench_credit(c: &mut Criterion) {
    let mut group = c.benchmark_group("credit");

    let shares: Vec<Credit> = (1..=60).map(|n| Credit::new(1, n)).collect();

    group.bench_function("sum_unit_fractions", |b| {
        b.iter(|| black_box(&shares).iter().copied().sum::<Credit>())
    });
    group.bench_function("from_float", |b| {
        b.iter(|| Credit::from_float(black_box(0.142857142857)))
    });

    group.finish();
}

criterion_group!(benches, bench_replay, bench_credit);
criterion_main!(benches);
