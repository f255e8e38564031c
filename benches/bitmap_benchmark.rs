use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipcounter::bitmap::Bitmap;

fn criterion_benchmark(c: &mut Criterion) {
    let mut bm = Bitmap::new(1 << 24).unwrap();
    for i in (0..(1 << 24)).step_by(7) {
        bm.set(i, true);
    }

    c.bench_function("bitmap_set", |b| {
        let mut bm = Bitmap::new(1 << 24).unwrap();
        let mut position = 0u32;
        b.iter(|| {
            bm.set(black_box(position), true);
            position = position.wrapping_add(104_729) % (1 << 24);
        })
    });

    c.bench_function("bitmap_get", |b| {
        b.iter(|| black_box(bm.get(black_box(12345))))
    });

    c.bench_function("bitmap_iter", |b| {
        b.iter(|| bm.iter().for_each(|p| drop(black_box(p))))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
