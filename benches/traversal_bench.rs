//! Benchmarks for treegen
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use treegen::parallel::{partition, PoolConfig, QuiescenceGroup, Traversal};
use treegen::render::{ParallelVisitorRenderer, Render};
use treegen::{render_sequential, ClassDescriptor};

fn classes(n: usize) -> Vec<ClassDescriptor> {
    (0..n)
        .map(|i| {
            ClassDescriptor::new(format!("Production{}", i))
                .doc(format!("production {}", i))
                .field("NodeToken", "f0")
                .field("Expression", "f1")
                .field("NodeListOptional", "f2")
        })
        .collect()
}

fn benchmark_partition(c: &mut Criterion) {
    c.bench_function("partition_10k_into_16", |b| {
        b.iter(|| {
            let chunks = partition((0..10_000u32).collect::<Vec<_>>(), 16);
            black_box(chunks);
        })
    });
}

fn benchmark_group_fork_done(c: &mut Criterion) {
    c.bench_function("group_fork_done", |b| {
        b.iter(|| {
            let group = QuiescenceGroup::new();
            group.fork(1).unwrap();
            for _ in 0..1000 {
                group.fork(1).unwrap();
                group.done().unwrap();
            }
            black_box(group.done().unwrap());
        })
    });
}

fn benchmark_render(c: &mut Criterion) {
    let input = classes(500);
    let render = ParallelVisitorRenderer::new("ParallelVisitor");

    c.bench_function("render_sequential_500", |b| {
        b.iter(|| black_box(render_sequential(&input, &render).unwrap()))
    });

    c.bench_function("render_chunked_500_4_lanes", |b| {
        b.iter(|| {
            let traversal = Traversal::new(&PoolConfig::with_lanes(4)).unwrap();
            let r = render.clone();
            traversal
                .run_chunked(input.clone(), 4, move |_, chunk, _| {
                    for class in &chunk {
                        black_box(r.render(class)?);
                    }
                    Ok(())
                })
                .unwrap();
            black_box(traversal.wait().unwrap());
        })
    });
}

criterion_group!(
    benches,
    benchmark_partition,
    benchmark_group_fork_done,
    benchmark_render
);
criterion_main!(benches);
