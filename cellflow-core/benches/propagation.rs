//! Benchmarks for change propagation through computed atoms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cellflow_core::reactive::{Atom, Update};

/// Build a chain of `depth` computed atoms, each adding one to the previous.
fn chain(depth: usize) -> (Atom<u64>, Atom<u64>) {
    let source = Atom::new(0_u64);
    let mut last = source.clone();
    for _ in 0..depth {
        let input = last.clone();
        last = Atom::computed(move |_| Ok(Update::Value(input.state() + 1)));
    }
    (source, last)
}

fn bench_set_without_dependents(c: &mut Criterion) {
    let atom = Atom::new(0_u64);
    let mut next = 0;

    c.bench_function("set_plain_atom", |b| {
        b.iter(|| {
            next += 1;
            atom.set(black_box(next));
        })
    });

    c.bench_function("set_identical_value", |b| {
        b.iter(|| atom.set(black_box(next)))
    });
}

fn bench_chain_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_propagation");
    for depth in [1, 10, 100] {
        let (source, tail) = chain(depth);
        let mut next = 0;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(tail.peek());
            })
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1000] {
        let source = Atom::new(0_u64);
        let dependents: Vec<Atom<u64>> = (0..width)
            .map(|offset| {
                let input = source.clone();
                Atom::computed(move |_| Ok(Update::Value(input.state() + offset)))
            })
            .collect();
        let mut next = 0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(dependents.len());
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_set_without_dependents,
    bench_chain_propagation,
    bench_fan_out,
);
criterion_main!(benches);
