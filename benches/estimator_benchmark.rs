use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipcounter::estimator::Estimator;
use ipcounter::hash::fnv1a_32;
use ipcounter::hyperloglog::HyperLogLog;
use ipcounter::ipv4::parse_ipv4;

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("parse_ipv4", |b| {
        b.iter(|| parse_ipv4(black_box(b"192.168.0.1")))
    });

    c.bench_function("fnv1a_32", |b| b.iter(|| fnv1a_32(black_box(3232235521))));

    c.bench_function("hyperloglog_add", |b| {
        let mut hll = HyperLogLog::new(14).unwrap();
        let mut value = 1u32;
        b.iter(|| {
            hll.add(black_box(value));
            value = value.wrapping_mul(2654435761).wrapping_add(1);
        })
    });

    c.bench_function("hyperloglog_count", |b| {
        let mut hll = HyperLogLog::new(14).unwrap();
        for i in 0u32..50_000 {
            hll.add(i.wrapping_mul(2654435761));
        }
        b.iter(|| black_box(hll.count()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
