//! The CPU reference backend's [`Driver`] implementation: a single device,
//! and host staging buffers that are just ordinary [`CpuBuffer`]s (host and
//! device memory coincide on this backend).

use std::sync::Arc;

use crate::driver::{BufferUsage, Device, DeviceBuffer, Driver};
use crate::element::DataType;
use crate::error::Error;

use super::buffer::CpuBuffer;
use super::device::CpuDevice;

/// The `"cpu"` driver: one device, backed by ordinary process memory.
#[derive(Debug)]
pub struct CpuDriver {
    device: Arc<CpuDevice>,
}

impl CpuDriver {
    pub(super) fn new() -> CpuDriver {
        CpuDriver { device: CpuDevice::new() }
    }
}

impl Driver for CpuDriver {
    fn name(&self) -> &str {
        "cpu"
    }

    fn enumerate_devices(&self) -> Vec<Arc<dyn Device>> {
        vec![self.device.clone() as Arc<dyn Device>]
    }

    fn allocate_host_buffer(&self, n: usize, dt: DataType, _usage: BufferUsage) -> Result<Arc<dyn DeviceBuffer>, Error> {
        Ok(Arc::new(CpuBuffer::allocate(n, dt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_exactly_one_device() {
        let driver = CpuDriver::new();
        assert_eq!(driver.enumerate_devices().len(), 1);
    }

    #[test]
    fn host_buffer_is_host_addressable() {
        let driver = CpuDriver::new();
        let buffer = driver.allocate_host_buffer(4, DataType::F32, BufferUsage::OneTime).unwrap();
        assert!(buffer.is_host());
        assert_eq!(buffer.len(), 4);
    }
}
