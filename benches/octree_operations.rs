//! Benchmark octree operations performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::f64::consts::PI;
use vyoma_map::{OccupancyOctree, Point3D, PointCloud};

/// Create a spherical scan around the sensor, the shape a 3D range
/// sensor produces in an empty room.
fn sphere_scan(radius: f64, rings: usize, points_per_ring: usize) -> PointCloud {
    let mut cloud = PointCloud::new();
    for ring in 1..rings {
        let polar = PI * ring as f64 / rings as f64;
        let (sin_p, cos_p) = polar.sin_cos();
        for i in 0..points_per_ring {
            let azimuth = 2.0 * PI * i as f64 / points_per_ring as f64;
            let (sin_a, cos_a) = azimuth.sin_cos();
            cloud.push(Point3D::new(
                radius * sin_p * cos_a,
                radius * sin_p * sin_a,
                radius * cos_p,
            ));
        }
    }
    cloud
}

fn bench_scan_insertion(c: &mut Criterion) {
    let scan = sphere_scan(4.0, 16, 64);
    let origin = Point3D::ZERO;

    c.bench_function("insert_scan_960pts", |b| {
        b.iter(|| {
            let mut tree = OccupancyOctree::new(0.05);
            let result = tree.insert_scan(black_box(&scan), black_box(origin));
            black_box(result)
        })
    });
}

fn bench_scan_insertion_resolutions(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_scan_resolution");

    for resolution in [0.2, 0.1, 0.05] {
        let scan = sphere_scan(4.0, 16, 64);
        group.bench_with_input(
            BenchmarkId::from_parameter(resolution),
            &resolution,
            |b, &resolution| {
                b.iter(|| {
                    let mut tree = OccupancyOctree::new(resolution);
                    tree.insert_scan(black_box(&scan), Point3D::ZERO)
                })
            },
        );
    }
    group.finish();
}

fn bench_single_voxel_update(c: &mut Criterion) {
    let mut tree = OccupancyOctree::new(0.05);
    let key = tree
        .codec()
        .point_to_key(Point3D::new(1.0, -2.0, 0.5))
        .unwrap();

    c.bench_function("update_node", |b| {
        b.iter(|| tree.update_node(black_box(key), true, false))
    });
}

fn bench_cast_ray(c: &mut Criterion) {
    let mut tree = OccupancyOctree::new(0.05);
    tree.insert_scan(&sphere_scan(4.0, 16, 64), Point3D::ZERO);

    c.bench_function("cast_ray_4m", |b| {
        b.iter(|| {
            tree.cast_ray(
                black_box(Point3D::ZERO),
                black_box(Point3D::new(0.6, 0.3, 0.1)),
                true,
                10.0,
            )
        })
    });
}

fn bench_leaf_iteration(c: &mut Criterion) {
    let mut tree = OccupancyOctree::new(0.05);
    tree.insert_scan(&sphere_scan(4.0, 16, 64), Point3D::ZERO);

    c.bench_function("iterate_leaves", |b| {
        b.iter(|| black_box(tree.leaves().count()))
    });
}

criterion_group!(
    benches,
    bench_scan_insertion,
    bench_scan_insertion_resolutions,
    bench_single_voxel_update,
    bench_cast_ray,
    bench_leaf_iteration
);
criterion_main!(benches);
