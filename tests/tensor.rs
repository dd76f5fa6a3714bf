//! Integration tests for the public `Tensor` surface: construction, views,
//! and host/device round trips, exercised through the crate's public API
//! rather than backend internals.

use approx::assert_relative_eq;
use tensorcore::backend::cpu;
use tensorcore::context::{with_context, ContextOptions};
use tensorcore::dims::Selector;
use tensorcore::element::{DataType, Scalar};
use tensorcore::scope::with_scope;
use tensorcore::tensor::{new_tensor, to_tensor, ToTensorOptions, TensorOptions};
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
fn three_by_three_round_trips_through_device_and_host() {
    with_scope(|| {
        in_cpu_context(|| {
            let data: Vec<f64> = (0..9).map(f64::from).collect();
            let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![3, 3]))?;
            let device_copy = tensor.clone_to_device(TensorOptions::new())?;
            let host_copy = device_copy.clone_to_host(TensorOptions::new())?;
            assert_eq!(host_copy.shape(), &[3, 3]);
            assert_close(&host_copy.to_flat_vec::<f64>()?, &data);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn select_extracts_a_top_left_submatrix() {
    with_scope(|| {
        in_cpu_context(|| {
            let data: Vec<f64> = (0..9).map(f64::from).collect();
            let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![3, 3]))?;
            let sub = tensor.select(&[Selector::Range(0..2), Selector::Range(0..2)])?;
            assert_eq!(sub.shape(), &[2, 2]);
            assert_close(&sub.to_flat_vec::<f64>()?, &[0.0, 1.0, 3.0, 4.0]);
            assert!(sub.partial_aliases(&tensor));
            assert!(!sub.aliases(&tensor));
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn transpose_reorders_axes_without_copying() {
    with_scope(|| {
        in_cpu_context(|| {
            let data: Vec<f64> = (0..6).map(f64::from).collect();
            let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![2, 3]))?;
            let transposed = tensor.transpose(&[1, 0])?;
            assert_eq!(transposed.shape(), &[3, 2]);
            assert!(transposed.aliases(&tensor));
            let materialized = transposed.clone_to_device(TensorOptions::new().force(true))?;
            assert_close(
                &materialized.to_flat_vec::<f64>()?,
                &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0],
            );
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn new_tensor_broadcasts_an_init_value() {
    with_scope(|| {
        in_cpu_context(|| {
            let tensor = new_tensor(&[2, 2], TensorOptions::new().init_value(Scalar::F64(7.0)))?;
            assert_close(&tensor.to_flat_vec::<f64>()?, &[7.0, 7.0, 7.0, 7.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn rows_and_columns_select_rank_two_slices() {
    with_scope(|| {
        in_cpu_context(|| {
            let data: Vec<f64> = (0..6).map(f64::from).collect();
            let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![2, 3]))?;
            assert_close(&tensor.rows(1..2)?.to_flat_vec::<f64>()?, &[3.0, 4.0, 5.0]);
            assert_close(&tensor.columns(0..1)?.to_flat_vec::<f64>()?, &[0.0, 3.0]);
            Ok(())
        })
    })
    .unwrap();
}

#[test]
fn to_tensor_rejects_a_shape_that_does_not_match_the_data() {
    with_scope(|| {
        in_cpu_context(|| {
            let data: Vec<f64> = vec![1.0, 2.0, 3.0];
            let result = to_tensor(&data, ToTensorOptions::new().shape(vec![4]));
            assert!(matches!(result, Err(Error::Shape(_))));
            Ok(())
        })
    })
    .unwrap();
}
