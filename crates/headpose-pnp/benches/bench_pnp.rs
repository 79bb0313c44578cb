use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use headpose_pnp as hpnp;
use rand::{rngs::StdRng, Rng, SeedableRng};

type PnpDataset = (Vec<[f32; 3]>, Vec<[f32; 2]>, [[f32; 3]; 3]);

fn generate_cube_dataset_with_seed(num_points: usize, noise_px: f32, seed: u64) -> PnpDataset {
    // Camera intrinsics, assumes no distortion
    let k = [[800.0, 0.0, 640.0], [0.0, 800.0, 480.0], [0.0, 0.0, 1.0]];

    // Simple cube-like distribution in front of the camera
    let mut world = Vec::with_capacity(num_points);
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..num_points {
        // points in a 1m cube around z in [3,6]
        world.push([
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
            rng.random_range(3.0..6.0),
        ]);
    }

    // Ground-truth pose (mild rotation/translation)
    let r = [
        [0.96, -0.10, 0.26],
        [0.12, 0.99, -0.04],
        [-0.25, 0.07, 0.97],
    ];
    let t = [0.2, -0.1, 0.3];

    let mut image = Vec::with_capacity(num_points);
    for p in &world {
        let xc = r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0];
        let yc = r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1];
        let zc = r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2];
        let mut u = k[0][0] * xc / zc + k[0][2];
        let mut v = k[1][1] * yc / zc + k[1][2];
        if noise_px > 0.0 {
            u += rng.random_range(-noise_px..noise_px);
            v += rng.random_range(-noise_px..noise_px);
        }
        image.push([u, v]);
    }

    (world, image, k)
}

fn bench_epnp(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_epnp");
    for &n in &[8usize, 32, 128, 468, 2048] {
        let (world, image, k) = generate_cube_dataset_with_seed(n, 0.5, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res =
                    hpnp::solve_pnp(&world, &image, &k, None, hpnp::PnPMethod::EPnPDefault)
                        .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_head_pose(c: &mut Criterion) {
    let mut group = c.benchmark_group("head_pose");
    let n = hpnp::FACE_MESH_LANDMARKS;
    let params = hpnp::HeadPoseParams::default();

    // Re-project the cube cloud through the frame-derived intrinsics so the
    // benchmark exercises the same camera model the entry point builds.
    let (world, _image, _k) = generate_cube_dataset_with_seed(n, 0.0, 7);
    let fk = hpnp::CameraIntrinsics::from_frame_size(1280.0, 960.0);
    let r = [
        [0.96, -0.10, 0.26],
        [0.12, 0.99, -0.04],
        [-0.25, 0.07, 0.97],
    ];
    let t = [0.2, -0.1, 0.3];
    let image: Vec<[f32; 2]> = world
        .iter()
        .map(|p: &[f32; 3]| {
            let xc = r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0];
            let yc = r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1];
            let zc = r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2];
            [fk.fx * xc / zc + fk.cx, fk.fy * yc / zc + fk.cy]
        })
        .collect();

    group.throughput(Throughput::Elements(n as u64));
    group.bench_function("cold", |b| {
        b.iter(|| {
            let res = hpnp::estimate_head_pose(1280.0, 960.0, &world, &image, None, &params)
                .unwrap();
            std::hint::black_box(res);
        });
    });

    let seed_pose = hpnp::estimate_head_pose(1280.0, 960.0, &world, &image, None, &params).unwrap();
    let guess = hpnp::PoseGuess {
        rvec: seed_pose.rvec,
        tvec: seed_pose.translation,
    };
    group.bench_function("warm", |b| {
        b.iter(|| {
            let res =
                hpnp::estimate_head_pose(1280.0, 960.0, &world, &image, Some(guess), &params)
                    .unwrap();
            std::hint::black_box(res);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_epnp, bench_head_pose);
criterion_main!(benches);
