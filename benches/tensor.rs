//! Tensor benchmarks: elementwise, reduction, and matrix-multiply
//! throughput on the reference CPU backend.

use std::time::Duration;

use criterion::measurement::WallTime;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use tensorcore::backend::cpu;
use tensorcore::context::{with_context, ContextOptions};
use tensorcore::element::{DataType, Scalar};
use tensorcore::math::{self, BinaryOp, ReductionOp};
use tensorcore::scope::with_scope;
use tensorcore::tensor::{to_tensor, ToTensorOptions};

fn configure<'a>(c: &'a mut Criterion, name: &str) -> BenchmarkGroup<'a, WallTime> {
    let _ = env_logger::try_init();
    let mut group = c.benchmark_group(name);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(30);
    group
}

fn random_vec(len: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..len).map(|_| rng.random::<f32>()).collect()
}

fn run_in_cpu_context<T>(body: impl FnOnce() -> Result<T, tensorcore::Error>) -> T {
    with_scope(|| {
        let driver = cpu::driver();
        let device = driver.enumerate_devices().remove(0);
        with_context(
            ContextOptions::new().driver(driver).device(device).datatype(DataType::F32),
            body,
        )
    })
    .unwrap()
}

const ELEMENTWISE_SIZES: &[(&str, usize)] = &[("65536", 65_536), ("1048576", 1_048_576)];

fn bench_binary_add(c: &mut Criterion) {
    let mut group = configure(c, "tensor/binary_add");
    for &(name, len) in ELEMENTWISE_SIZES {
        let x_data = random_vec(len);
        let y_data = random_vec(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &len, |bencher, _| {
            run_in_cpu_context(|| {
                let x = to_tensor(&x_data, ToTensorOptions::new())?;
                let y = to_tensor(&y_data, ToTensorOptions::new())?;
                let dest = to_tensor(&vec![0.0_f32; len], ToTensorOptions::new())?;
                bencher.iter(|| {
                    math::binary(BinaryOp::Add, &dest, Scalar::F32(1.0), &x, Scalar::F32(1.0), &y).unwrap();
                });
                Ok(())
            });
        });
    }
    group.finish();
}

const MATMUL_SIZES: &[(&str, usize, usize, usize)] = &[
    ("64x64x64", 64, 64, 64),
    ("256x256x256", 256, 256, 256),
    ("512x512x512", 512, 512, 512),
];

fn bench_matmul(c: &mut Criterion) {
    let mut group = configure(c, "tensor/matmul");
    for &(name, m, k, n) in MATMUL_SIZES {
        let a_data = random_vec(m * k);
        let b_data = random_vec(k * n);
        group.throughput(Throughput::Elements((2 * m * k * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &(m, k, n), |bencher, _| {
            run_in_cpu_context(|| {
                let a = to_tensor(&a_data, ToTensorOptions::new().shape(vec![m, k]))?;
                let b = to_tensor(&b_data, ToTensorOptions::new().shape(vec![k, n]))?;
                let c = to_tensor(&vec![0.0_f32; m * n], ToTensorOptions::new().shape(vec![m, n]))?;
                bencher.iter(|| {
                    math::gemm(&c, false, false, Scalar::F32(1.0), &a, &b, Scalar::F32(0.0)).unwrap();
                });
                Ok(())
            });
        });
    }
    group.finish();
}

fn bench_sum_reduce(c: &mut Criterion) {
    let mut group = configure(c, "tensor/reduce_sum");
    for &(name, len) in ELEMENTWISE_SIZES {
        let data = random_vec(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &len, |bencher, _| {
            run_in_cpu_context(|| {
                let input = to_tensor(&data, ToTensorOptions::new())?;
                let dest = to_tensor(&[0.0_f32], ToTensorOptions::new().shape(vec![]))?;
                bencher.iter(|| {
                    math::reduction(ReductionOp::Sum, &dest, Scalar::F32(1.0), &input).unwrap();
                });
                Ok(())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_binary_add, bench_matmul, bench_sum_reduce);
criterion_main!(benches);
