//! Benchmarks for intrinsic triangulation operations.

use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Point3;
use signpost::prelude::*;

fn grid_positions(n: usize) -> (Vec<[usize; 3]>, Vec<Point3<f64>>) {
    let mut vertices = Vec::with_capacity((n + 1) * (n + 1));
    let mut faces = Vec::with_capacity(n * n * 2);

    for j in 0..=n {
        for i in 0..=n {
            // A mild height field keeps the intrinsic metric non-trivial.
            let (x, y) = (i as f64, j as f64);
            vertices.push(Point3::new(x, y, (0.7 * x).sin() * (0.9 * y).cos() * 0.4));
        }
    }

    for j in 0..n {
        for i in 0..n {
            let v00 = j * (n + 1) + i;
            let v10 = v00 + 1;
            let v01 = v00 + (n + 1);
            let v11 = v01 + 1;
            faces.push([v00, v10, v11]);
            faces.push([v00, v11, v01]);
        }
    }

    (faces, vertices)
}

fn build_grid_triangulation(n: usize) -> SignpostTriangulation {
    let (faces, vertices) = grid_positions(n);
    let mesh: HalfEdgeMesh = build_from_triangles(&faces, vertices.len()).unwrap();
    SignpostTriangulation::from_positions(mesh, &vertices).unwrap()
}

fn bench_construction(c: &mut Criterion) {
    c.bench_function("construct_grid_20x20", |b| {
        let (faces, vertices) = grid_positions(20);
        b.iter(|| {
            let mesh: HalfEdgeMesh = build_from_triangles(&faces, vertices.len()).unwrap();
            SignpostTriangulation::from_positions(mesh, &vertices).unwrap()
        });
    });
}

fn bench_flip_to_delaunay(c: &mut Criterion) {
    c.bench_function("flip_to_delaunay_grid_20x20", |b| {
        b.iter_with_setup(
            || build_grid_triangulation(20),
            |mut tri| flip_to_delaunay(&mut tri),
        );
    });
}

fn bench_delaunay_refine(c: &mut Criterion) {
    c.bench_function("delaunay_refine_grid_10x10", |b| {
        let options = RefineOptions::default()
            .with_angle_threshold_degrees(25.0)
            .with_max_insertions(2000);
        b.iter_with_setup(
            || build_grid_triangulation(10),
            |mut tri| delaunay_refine(&mut tri, &options),
        );
    });
}

fn bench_trace_edges(c: &mut Criterion) {
    c.bench_function("trace_edges_grid_10x10_refined", |b| {
        let mut tri = build_grid_triangulation(10);
        let options = RefineOptions::default()
            .with_angle_threshold_degrees(25.0)
            .with_max_insertions(500);
        delaunay_refine(&mut tri, &options);
        b.iter(|| tri.trace_edges());
    });
}

criterion_group!(
    benches,
    bench_construction,
    bench_flip_to_delaunay,
    bench_delaunay_refine,
    bench_trace_edges
);
criterion_main!(benches);
