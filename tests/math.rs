//! Integration tests for the math dispatch table (`tensorcore::math`):
//! broadcasting, matrix multiply, reductions, and the aliasing guards that
//! run ahead of any backend call.

use approx::assert_relative_eq;
use tensorcore::backend::cpu;
use tensorcore::context::{with_context, ContextOptions};
use tensorcore::element::{DataType, Scalar};
use tensorcore::math::{self, BinaryOp, ReductionOp};
use tensorcore::scope::with_scope;
use tensorcore::tensor::{to_tensor, ToTensorOptions};
use tensorcore::Error;

fn in_cpu_context<T>(body: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    let driver = cpu::driver();
    let device = driver.enumerate_devices().remove(0);
    with_context(
        ContextOptions::new().driver(driver).device(device).datatype(DataType::F64),
        body,
    )
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, b) in actual.iter().zip(expected) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
}

#[test]
fn binary_add_broadcasts_the_smaller_operand() {
    with_scope(|| {
        in_cpu_context(|| {
            let x = to_tensor(&[10.0_f64, 20.0, 30.0, 40.0, 50.0, 60.0], ToTensorOptions::new().shape(vec![2, 3]))?;
            let y = to_tensor(&[1.0_f64, 2.0, 3.0], ToTensorOptions::new())?;
            let dest = to_tensor(&[0.0_f64; 6], ToTensorOptions::new().shape(vec![2, 3]))?;
            math::binary(BinaryOp::Add, &dest, Scalar::F64(1.0), &x, Scalar::F64(1.0), &y)?;
            assert_close(&dest.to_flat_vec::<f64>()?, &[11.0, 22.0, 33.0, 41.0, 52.0, 63.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn gemm_matches_a_known_product() {
    with_scope(|| {
        in_cpu_context(|| {
            let a = to_tensor(&[1.0_f64, 2.0, 3.0, 4.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let b = to_tensor(&[5.0_f64, 6.0, 7.0, 8.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let c = to_tensor(&[0.0_f64; 4], ToTensorOptions::new().shape(vec![2, 2]))?;
            math::gemm(&c, false, false, Scalar::F64(1.0), &a, &b, Scalar::F64(0.0))?;
            assert_close(&c.to_flat_vec::<f64>()?, &[19.0, 22.0, 43.0, 50.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn gemm_honors_a_transposed_operand() {
    with_scope(|| {
        in_cpu_context(|| {
            let a = to_tensor(&[1.0_f64, 2.0, 3.0, 4.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let b = to_tensor(&[5.0_f64, 6.0, 7.0, 8.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let c = to_tensor(&[0.0_f64; 4], ToTensorOptions::new().shape(vec![2, 2]))?;
            math::gemm(&c, true, false, Scalar::F64(1.0), &a, &b, Scalar::F64(0.0))?;
            assert_close(&c.to_flat_vec::<f64>()?, &[26.0, 30.0, 38.0, 44.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn gemm_rejects_a_destination_that_aliases_an_operand() {
    with_scope(|| {
        in_cpu_context(|| {
            let a = to_tensor(&[1.0_f64, 2.0, 3.0, 4.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let b = to_tensor(&[5.0_f64, 6.0, 7.0, 8.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let result = math::gemm(&a, false, false, Scalar::F64(1.0), &a, &b, Scalar::F64(0.0));
            assert!(matches!(result, Err(Error::Alias(_))));
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn reduction_computes_magnitude_over_the_last_axis() {
    with_scope(|| {
        in_cpu_context(|| {
            let input = to_tensor(&[3.0_f64, 4.0, 0.0, 5.0], ToTensorOptions::new().shape(vec![2, 2]))?;
            let dest = to_tensor(&[0.0_f64; 2], ToTensorOptions::new())?;
            math::reduction(ReductionOp::Magnitude, &dest, Scalar::F64(1.0), &input)?;
            assert_close(&dest.to_flat_vec::<f64>()?, &[5.0, 5.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn unary_applies_a_prescale_before_the_operation() {
    with_scope(|| {
        in_cpu_context(|| {
            let x = to_tensor(&[1.0_f64, -1.0, 2.0, -2.0], ToTensorOptions::new())?;
            let dest = to_tensor(&[0.0_f64; 4], ToTensorOptions::new())?;
            math::unary(tensorcore::math::UnaryOp::Negate, &dest, Scalar::F64(2.0), &x)?;
            assert_close(&dest.to_flat_vec::<f64>()?, &[-2.0, 2.0, -4.0, 4.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn binary_rejects_operands_with_incommensurate_shapes() {
    with_scope(|| {
        in_cpu_context(|| {
            let x = to_tensor(&[1.0_f64, 2.0, 3.0], ToTensorOptions::new())?;
            let y = to_tensor(&[1.0_f64, 2.0], ToTensorOptions::new())?;
            let dest = to_tensor(&[0.0_f64; 3], ToTensorOptions::new())?;
            let result = math::binary(BinaryOp::Add, &dest, Scalar::F64(1.0), &x, Scalar::F64(1.0), &y);
            assert!(matches!(result, Err(Error::Shape(_))));
            Ok(())
        })
    })
    .unwrap();
}
