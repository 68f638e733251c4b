use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use voltrack_3d::kdtree::KdTree;
use voltrack_3d::volume::OccupancyVolume;
use voltrack_3d::DVec3;

fn sphere(res: usize) -> OccupancyVolume {
    let c = res as f64 / 2.0;
    OccupancyVolume::from_fn(DVec3::ZERO, 1.0 / res as f64, [res; 3], |[x, y, z]| {
        (DVec3::new(x as f64, y as f64, z as f64) + 0.5 - c).length() < c * 0.9
    })
    .expect("valid volume")
}

fn bench_lloyd(c: &mut Criterion) {
    let mut group = c.benchmark_group("lloyd_gradient");

    for res in [32, 64] {
        let vol = sphere(res);
        let centers = vol.random_sample(500, 0).expect("enough cells");
        group.bench_with_input(BenchmarkId::new("sphere", res), &res, |b, _| {
            b.iter(|| black_box(vol.lloyd_gradient(&centers, 1.0)))
        });
    }
    group.finish();
}

fn bench_kdtree(c: &mut Criterion) {
    let vol = sphere(64);
    let points = vol.random_sample(2000, 0).expect("enough cells");
    let queries = vol.random_sample(2000, 1).expect("enough cells");
    let tree = KdTree::new(&points);

    c.bench_function("kdtree_find_nearest", |b| {
        b.iter(|| {
            for &q in &queries {
                black_box(tree.find_nearest(q));
            }
        })
    });

    c.bench_function("kdtree_find_nearest_with_guess", |b| {
        b.iter(|| {
            let mut guess = 0;
            for &q in &queries {
                guess = tree.find_nearest_with_guess(q, guess).unwrap_or(0);
            }
            black_box(guess)
        })
    });
}

criterion_group!(benches, bench_lloyd, bench_kdtree);
criterion_main!(benches);
