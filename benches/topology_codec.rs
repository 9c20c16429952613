//! Benchmark for layout encoding and property diffs
//!
//! Covers the pure work done on every apply: building the vdev spec,
//! projecting layouts into host records, and diffing declared properties.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use zpool_reconciler::topology::{decode_vdev_spec, flatten_mirror};
use zpool_reconciler::{DeclaredProperties, Device, Mirror, PoolLayout, PropertyDiff};

fn layout(mirrors: usize) -> PoolLayout {
    PoolLayout::new(
        (0..4).map(|i| Device::new(format!("/dev/sd{}", i))).collect(),
        (0..mirrors)
            .map(|m| {
                Mirror::new(vec![
                    Device::new(format!("/dev/disk/by-id/wwn-{:04}a", m)),
                    Device::new(format!("/dev/disk/by-id/wwn-{:04}b", m)),
                ])
            })
            .collect(),
    )
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_codec");
    let large = layout(64);
    group.throughput(Throughput::Elements(large.vdev_count() as u64));

    group.bench_function("encode_vdev_spec", |b| {
        b.iter(|| black_box(&large).to_vdev_spec());
    });

    let spec = large.to_vdev_spec();
    group.bench_function("decode_vdev_spec", |b| {
        b.iter(|| decode_vdev_spec(black_box(&spec)));
    });

    group.finish();
}

fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_codec");
    let large = layout(64);
    group.throughput(Throughput::Elements(large.mirrors.len() as u64));

    group.bench_function("flatten_mirrors", |b| {
        b.iter(|| {
            black_box(&large)
                .mirrors
                .iter()
                .map(flatten_mirror)
                .collect::<Vec<_>>()
        });
    });

    group.bench_function("to_blocks", |b| {
        b.iter(|| black_box(&large).to_blocks());
    });

    group.finish();
}

fn bench_property_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("property_diff");

    let old: DeclaredProperties = (0..50)
        .map(|i| (format!("user:key{}", i), format!("v{}", i)))
        .collect();
    let new: DeclaredProperties = (25..75)
        .map(|i| (format!("user:key{}", i), format!("v{}", i % 40)))
        .collect();
    group.throughput(Throughput::Elements((old.len() + new.len()) as u64));

    group.bench_function("compute", |b| {
        b.iter(|| PropertyDiff::compute(black_box(&old), black_box(&new)));
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_flatten, bench_property_diff);
criterion_main!(benches);
