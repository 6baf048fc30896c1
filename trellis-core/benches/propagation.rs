//! Propagation benchmarks: signal fan-out and derived chains.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::reactive::{Derived, Effect, Signal};

fn signal_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_fan_out");
    for width in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let source = Signal::new(0u64);
            let total = Rc::new(Cell::new(0u64));
            let effects: Vec<Effect> = (0..width)
                .map(|_| {
                    let (source, total) = (source.clone(), total.clone());
                    Effect::new(move || total.set(total.get().wrapping_add(source.get())))
                })
                .collect();

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(black_box(next));
            });

            for effect in &effects {
                effect.stop();
            }
        });
    }
    group.finish();
}

fn derived_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived_chain");
    for depth in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let source = Signal::new(0u64);
            let mut chain: Vec<Derived<u64>> = Vec::with_capacity(depth);
            for i in 0..depth {
                let link = match chain.last() {
                    Some(prev) => {
                        let prev = prev.clone();
                        Derived::new(move || prev.get() + 1)
                    }
                    None => {
                        let source = source.clone();
                        Derived::new(move || source.get() + i as u64)
                    }
                };
                chain.push(link);
            }

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(chain.last().map(Derived::get_untracked))
            });

            for link in &chain {
                link.dispose();
            }
        });
    }
    group.finish();
}

criterion_group!(benches, signal_fan_out, derived_chain);
criterion_main!(benches);
