//! The CPU reference backend's [`Device`] implementation: a single
//! process-wide device backed by host memory, reporting real `/proc/meminfo`
//! figures where available.

use std::fs;
use std::sync::{Arc, Weak};

use crate::driver::{BufferUsage, Device, DeviceBuffer, MemoryInfo, Stream};
use crate::element::DataType;
use crate::error::Error;

use super::buffer::CpuBuffer;
use super::stream::CpuStream;

/// The CPU backend's sole [`Device`]: host memory, always available, always
/// able to spawn additional streams.
#[derive(Debug)]
pub struct CpuDevice {
    self_ref: Weak<CpuDevice>,
    default_stream: Arc<dyn Stream>,
}

impl CpuDevice {
    /// Builds the device, resolving its own self-referential `Arc` up front
    /// so [`Stream::device`] can hand back an owning reference without a
    /// separate registry.
    pub(super) fn new() -> Arc<CpuDevice> {
        Arc::new_cyclic(|self_ref| CpuDevice {
            self_ref: self_ref.clone(),
            default_stream: Arc::new(CpuStream::new(self_ref.clone())),
        })
    }
}

impl Device for CpuDevice {
    fn driver_name(&self) -> &str {
        "cpu"
    }

    fn memory_info(&self) -> Result<MemoryInfo, Error> {
        let contents = fs::read_to_string("/proc/meminfo")
            .map_err(|err| Error::Device(format!("cannot read /proc/meminfo: {err}")))?;
        let kb = |label: &str| -> Result<u64, Error> {
            contents
                .lines()
                .find(|line| line.starts_with(label))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|value| value.parse::<u64>().ok())
                .map(|kib| kib * 1024)
                .ok_or_else(|| Error::Device(format!("/proc/meminfo has no {label} entry")))
        };
        Ok(MemoryInfo {
            free: kb("MemAvailable:")?,
            total: kb("MemTotal:")?,
        })
    }

    fn supports_create_stream(&self) -> bool {
        true
    }

    fn default_stream(&self) -> Arc<dyn Stream> {
        Arc::clone(&self.default_stream)
    }

    fn create_stream(&self) -> Result<Arc<dyn Stream>, Error> {
        Ok(Arc::new(CpuStream::new(self.self_ref.clone())))
    }

    fn allocate_device_buffer(
        &self,
        n: usize,
        dt: DataType,
        _usage: BufferUsage,
    ) -> Result<Arc<dyn DeviceBuffer>, Error> {
        Ok(Arc::new(CpuBuffer::allocate(n, dt)))
    }

    fn acceptable_device_buffer(&self, _buffer: &dyn DeviceBuffer) -> bool {
        true
    }

    fn acceptable_host_buffer(&self, _buffer: &dyn DeviceBuffer) -> bool {
        true
    }
}
