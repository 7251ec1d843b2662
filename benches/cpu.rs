use criterion::{criterion_group, criterion_main, Criterion};
use greyboy::test::{build_test, TestOptions};

fn benchmark_machine_ticks(c: &mut Criterion) {
    let mut gb = build_test(TestOptions::default());

    c.bench_function("machine_ticks", |b| {
        b.iter(|| {
            gb.clocks(1_000_000);
        })
    });
}

fn benchmark_frame(c: &mut Criterion) {
    let mut gb = build_test(TestOptions::default());

    c.bench_function("frame", |b| {
        b.iter(|| {
            gb.frame();
        })
    });
}

criterion_group!(benches, benchmark_machine_ticks, benchmark_frame);
criterion_main!(benches);
