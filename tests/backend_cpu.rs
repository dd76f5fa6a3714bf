//! Integration tests for the CPU reference backend's driver-level contracts,
//! exercised through the public `driver`/`tensor` surfaces rather than the
//! backend's private types.

use tensorcore::backend::cpu;
use tensorcore::context::{with_context, ContextOptions};
use tensorcore::driver::{self, registry, BufferUsage};
use tensorcore::element::DataType;
use tensorcore::scope::with_scope;
use tensorcore::tensor::{to_tensor, ToTensorOptions};
use tensorcore::Error;

fn init_logging() {
    let _ = env_logger::try_init();
}

#[test]
fn cpu_is_preregistered_under_its_own_name() {
    init_logging();
    let found = registry::driver("cpu").unwrap();
    assert_eq!(found.name(), "cpu");
}

#[test]
fn the_cpu_device_enumerates_exactly_one_device_with_real_memory_info() {
    init_logging();
    let driver = cpu::driver();
    let devices = driver.enumerate_devices();
    assert_eq!(devices.len(), 1);
    let info = devices[0].memory_info().unwrap();
    assert!(info.total > 0);
    assert!(info.total >= info.free);
}

#[test]
fn a_device_buffer_views_report_correct_backing_ranges() {
    init_logging();
    let driver = cpu::driver();
    let device = driver.enumerate_devices().remove(0);
    let buffer = device
        .allocate_device_buffer(8, DataType::I32, BufferUsage::OneTime)
        .unwrap();
    let view = buffer.sub_buffer(2, 4).unwrap();
    assert_eq!(view.backing_id(), buffer.backing_id());
    assert_eq!(view.backing_range(), (2, 6));
    assert!(driver::partial_aliases(buffer.as_ref(), view.as_ref()));
    assert!(!driver::aliases(buffer.as_ref(), view.as_ref()));
}

#[test]
fn releasing_a_buffer_with_an_outstanding_sub_buffer_view_fails() {
    init_logging();
    let driver = cpu::driver();
    let device = driver.enumerate_devices().remove(0);
    let buffer = device
        .allocate_device_buffer(4, DataType::F32, BufferUsage::OneTime)
        .unwrap();
    let view = buffer.sub_buffer(0, 2).unwrap();
    assert!(matches!(buffer.release(), Err(Error::Resource { .. })));
    drop(view);
    assert!(buffer.release().is_ok());
}

#[test]
fn a_freshly_created_stream_reports_the_owning_device() {
    init_logging();
    let driver = cpu::driver();
    let device = driver.enumerate_devices().remove(0);
    let stream = device.create_stream().unwrap();
    assert_eq!(stream.driver_name(), "cpu");
    assert_eq!(stream.device().driver_name(), "cpu");
}

#[test]
fn rand_fills_a_tensor_deterministically_given_a_seed() {
    init_logging();
    with_scope(|| {
        let driver = cpu::driver();
        let device = driver.enumerate_devices().remove(0);
        with_context(
            ContextOptions::new().driver(driver).device(device).datatype(DataType::F32),
            || {
                let dest = to_tensor(&[0.0_f32; 16], ToTensorOptions::new())?;
                tensorcore::math::rand(
                    &dest,
                    tensorcore::math::Distribution::Flat { min: 0.0, max: 1.0 },
                    Some(42),
                )?;
                let first = dest.to_flat_vec::<f32>()?;

                let dest_again = to_tensor(&[0.0_f32; 16], ToTensorOptions::new())?;
                tensorcore::math::rand(
                    &dest_again,
                    tensorcore::math::Distribution::Flat { min: 0.0, max: 1.0 },
                    Some(42),
                )?;
                let second = dest_again.to_flat_vec::<f32>()?;

                assert_eq!(first, second);
                assert!(first.iter().all(|&v| (0.0..1.0).contains(&v)));
                Ok(())
            },
        )
    })
    .unwrap();
}
