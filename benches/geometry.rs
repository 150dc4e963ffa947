// Geometry resolution benchmarks
//
// Resolution runs on every request before any pixel work, so it must stay
// trivially cheap relative to decode/encode.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tessera::geometry::{resolve_region, resolve_size, Region, Size, SizeLimits};

const LIMITS: SizeLimits = SizeLimits {
    max_width: 10_000,
    max_height: 10_000,
    max_source_pixels: 400_000_000,
};

fn bench_resolve_region(c: &mut Criterion) {
    let percent = Region::Percent {
        x: 12.5,
        y: 12.5,
        width: 75.0,
        height: 75.0,
    };
    let pixels = Region::Pixels {
        x: 1024,
        y: 768,
        width: 2048,
        height: 2048,
    };

    c.bench_function("resolve_region_percent", |b| {
        b.iter(|| resolve_region(black_box(&percent), black_box(30_000), black_box(20_000)))
    });
    c.bench_function("resolve_region_pixels_clipped", |b| {
        b.iter(|| resolve_region(black_box(&pixels), black_box(2_500), black_box(2_000)))
    });
}

fn bench_resolve_size(c: &mut Criterion) {
    let region = resolve_region(&Region::Full, 30_000, 20_000).unwrap();
    let confined = Size::Confined {
        width: 1_000,
        height: 1_000,
    };

    c.bench_function("resolve_size_width", |b| {
        b.iter(|| resolve_size(black_box(&Size::Width(800)), black_box(&region), &LIMITS))
    });
    c.bench_function("resolve_size_confined", |b| {
        b.iter(|| resolve_size(black_box(&confined), black_box(&region), &LIMITS))
    });
}

criterion_group!(benches, bench_resolve_region, bench_resolve_size);
criterion_main!(benches);
