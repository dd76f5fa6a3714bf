//! Driver/Device/Stream/Buffer contracts (C4): the capability sets every
//! backend implements, expressed as trait objects rather than an
//! inheritance hierarchy (§9 "Capability dispatch instead of inheritance").

pub mod registry;

use std::fmt::Debug;
use std::sync::Arc;

use crate::dims::Dimensions;
use crate::element::{DataType, Scalar};
use crate::error::Error;
use crate::math::{BinaryOp, Distribution, ReductionOp, UnaryOp};

/// Whether a buffer is expected to be written once then read (`OneTime`) or
/// reused across many operations (`Reusable`). Backends may use this as a
/// hint for which memory pool to allocate from; the CPU reference backend
/// ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// The buffer is written once and not expected to be reused.
    OneTime,
    /// The buffer is expected to be reused across many operations.
    Reusable,
}

/// Free and total memory, in bytes, as reported by [`Device::memory_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Bytes currently available for allocation.
    pub free: u64,
    /// Total bytes the device reports owning.
    pub total: u64,
}

/// An opaque marker inserted into a stream's queue by
/// [`Stream::insert_event`], used to make another stream wait via
/// [`Stream::wait_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Name of the driver that owns the stream this event was inserted
    /// into; cross-driver waits are rejected before reaching the backend.
    pub driver_name: &'static str,
    /// Monotonic sequence number within the owning stream.
    pub sequence: u64,
}

/// Identity of a buffer's backing allocation, used by [`aliases`] and
/// [`partial_aliases`] to decide whether two views share storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackingId(pub u64);

/// The Buffer capability (§4.4): an opaque, datatype-tagged allocation or
/// view into one, plus the typed host-access surface C3's index math needs
/// when the buffer is host-addressable.
pub trait DeviceBuffer: Debug + Send + Sync {
    /// The element type this buffer is tagged with.
    fn datatype(&self) -> DataType;

    /// Element count.
    fn len(&self) -> usize;

    /// Whether this buffer has zero elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer is host-addressable (a staging buffer, or a
    /// device buffer on a backend where host and device memory coincide).
    fn is_host(&self) -> bool;

    /// Identity of the backing allocation this buffer is a view into.
    fn backing_id(&self) -> BackingId;

    /// `[start, end)` element range this buffer occupies within its
    /// backing allocation.
    fn backing_range(&self) -> (usize, usize);

    /// Returns a view over `[offset, offset + len)` elements of this
    /// buffer, sharing backing storage (no copy).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `offset + len` exceeds `self.len()`.
    fn sub_buffer(&self, offset: usize, len: usize) -> Result<Arc<dyn DeviceBuffer>, Error>;

    /// Releases this buffer. The CPU reference backend's implementation
    /// fails with [`Error::Resource`] if a sub-buffer view still holds a
    /// reference to the same backing allocation (§3 "releasing the parent
    /// while a sub-buffer exists is a usage error").
    fn release(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Reads the element at `index` (relative to this view). Only
    /// meaningful when [`DeviceBuffer::is_host`] is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if this buffer is not host-addressable.
    fn read_scalar(&self, index: usize) -> Result<Scalar, Error>;

    /// Writes `value` (converted per §4.2) at `index` (relative to this
    /// view). Only meaningful when [`DeviceBuffer::is_host`] is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if this buffer is not host-addressable.
    fn write_scalar(&self, index: usize, value: Scalar) -> Result<(), Error>;

    /// Upcast for backend-specific downcasting (e.g. a fast path that
    /// recognizes its own concrete buffer type).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// True iff `a` and `b` are views over the same backing allocation and
/// cover the identical element range.
#[must_use]
pub fn aliases(a: &dyn DeviceBuffer, b: &dyn DeviceBuffer) -> bool {
    a.backing_id() == b.backing_id() && a.backing_range() == b.backing_range()
}

/// True iff `a` and `b` are views over the same backing allocation and
/// their element ranges overlap.
#[must_use]
pub fn partial_aliases(a: &dyn DeviceBuffer, b: &dyn DeviceBuffer) -> bool {
    if a.backing_id() != b.backing_id() {
        return false;
    }
    let (a_start, a_end) = a.backing_range();
    let (b_start, b_end) = b.backing_range();
    a_start < b_end && b_start < a_end
}

/// The Stream capability (§4.4): a serialized execution queue, plus the
/// per-stream math dispatch table (§4.6).
#[allow(clippy::too_many_arguments)]
pub trait Stream: Debug + Send + Sync {
    /// Name of the driver that owns this stream.
    fn driver_name(&self) -> &str;

    /// The device this stream executes on.
    fn device(&self) -> Arc<dyn Device>;

    /// Enqueues a host-to-device copy of `n` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn copy_host_to_device(
        &self,
        host: &dyn DeviceBuffer,
        host_off: usize,
        dev: &dyn DeviceBuffer,
        dev_off: usize,
        n: usize,
    ) -> Result<(), Error>;

    /// Enqueues a device-to-host copy of `n` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn copy_device_to_host(
        &self,
        dev: &dyn DeviceBuffer,
        dev_off: usize,
        host: &dyn DeviceBuffer,
        host_off: usize,
        n: usize,
    ) -> Result<(), Error>;

    /// Enqueues a device-to-device copy of `n` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn copy_device_to_device(
        &self,
        src: &dyn DeviceBuffer,
        src_off: usize,
        dst: &dyn DeviceBuffer,
        dst_off: usize,
        n: usize,
    ) -> Result<(), Error>;

    /// Blocks the caller until this stream's queue drains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn sync_with_host(&self) -> Result<(), Error>;

    /// Inserts an event at the current end of this stream's queue.
    fn insert_event(&self) -> Event;

    /// Makes this stream await `event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn wait_event(&self, event: &Event) -> Result<(), Error>;

    /// Makes `self` await an event inserted into `src`'s queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossDriver`] if `self` and `src` belong to
    /// different drivers.
    fn sync_with_stream(&self, src: &dyn Stream) -> Result<(), Error> {
        if self.driver_name() != src.driver_name() {
            return Err(Error::CrossDriver(format!(
                "cannot sync a stream of driver {:?} with a stream of driver {:?}",
                self.driver_name(),
                src.driver_name()
            )));
        }
        let event = src.insert_event();
        self.wait_event(&event)
    }

    /// `dest = f(alpha * x)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn unary(
        &self,
        op: UnaryOp,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        x: &dyn DeviceBuffer,
        x_dims: &Dimensions,
    ) -> Result<(), Error>;

    /// `dest = (alpha * x) op (beta * y)`, with commensurate broadcasting
    /// already validated by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn binary(
        &self,
        op: BinaryOp,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        x: &dyn DeviceBuffer,
        x_dims: &Dimensions,
        beta: Scalar,
        y: &dyn DeviceBuffer,
        y_dims: &Dimensions,
    ) -> Result<(), Error>;

    /// `dest = (alpha * x) >= 0 ? (beta * y) : (gamma * z)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn ternary_select(
        &self,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        x: &dyn DeviceBuffer,
        x_dims: &Dimensions,
        beta: Scalar,
        y: &dyn DeviceBuffer,
        y_dims: &Dimensions,
        gamma: Scalar,
        z: &dyn DeviceBuffer,
        z_dims: &Dimensions,
    ) -> Result<(), Error>;

    /// `dest = reduce(alpha * input)` along `input`'s last axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn reduction(
        &self,
        op: ReductionOp,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        input: &dyn DeviceBuffer,
        input_dims: &Dimensions,
    ) -> Result<(), Error>;

    /// `C = alpha * opA(A) * opB(B) + beta * C`, in canonical BLAS form
    /// (§4.6): `trans_a`/`trans_b` already account for any "in-place
    /// transposed" operand, and every leading dimension is expressed
    /// against a contiguous fastest-varying axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn gemm(
        &self,
        c: &dyn DeviceBuffer,
        c_offset: usize,
        column_stride_c: usize,
        trans_a: bool,
        trans_b: bool,
        alpha: Scalar,
        a: &dyn DeviceBuffer,
        a_offset: usize,
        rows_a: usize,
        cols_a: usize,
        column_stride_a: usize,
        b: &dyn DeviceBuffer,
        b_offset: usize,
        cols_b: usize,
        column_stride_b: usize,
        beta: Scalar,
    ) -> Result<(), Error>;

    /// `dest = samples(distribution)`. `f32` only (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    fn rand(
        &self,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        distribution: Distribution,
        seed: Option<u64>,
    ) -> Result<(), Error>;
}

/// The Device capability (§4.4): a unit that owns memory and may spawn
/// streams.
pub trait Device: Debug + Send + Sync {
    /// Name of the driver that owns this device.
    fn driver_name(&self) -> &str;

    /// Free/total memory, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the backend cannot report memory usage.
    fn memory_info(&self) -> Result<MemoryInfo, Error>;

    /// Whether [`Device::create_stream`] is supported.
    fn supports_create_stream(&self) -> bool;

    /// The device's always-available default stream.
    fn default_stream(&self) -> Arc<dyn Stream>;

    /// Creates an additional, independent stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if [`Device::supports_create_stream`] is
    /// `false` or the backend fails to create one.
    fn create_stream(&self) -> Result<Arc<dyn Stream>, Error>;

    /// Allocates a device buffer of `n` elements of type `dt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on allocation failure.
    fn allocate_device_buffer(
        &self,
        n: usize,
        dt: DataType,
        usage: BufferUsage,
    ) -> Result<Arc<dyn DeviceBuffer>, Error>;

    /// Whether `buffer` (a device buffer) can be operated on directly by
    /// this device without staging.
    fn acceptable_device_buffer(&self, buffer: &dyn DeviceBuffer) -> bool;

    /// Whether `buffer` (a host buffer) is directly addressable by this
    /// device, letting callers skip a staging copy.
    fn acceptable_host_buffer(&self, buffer: &dyn DeviceBuffer) -> bool;
}

/// The Driver capability (§4.4): a backend registry entry capable of
/// enumerating devices and allocating host staging buffers.
pub trait Driver: Debug + Send + Sync {
    /// The name this driver is registered under.
    fn name(&self) -> &str;

    /// All devices this driver exposes.
    fn enumerate_devices(&self) -> Vec<Arc<dyn Device>>;

    /// Allocates a host staging buffer of `n` elements of type `dt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on allocation failure.
    fn allocate_host_buffer(
        &self,
        n: usize,
        dt: DataType,
        usage: BufferUsage,
    ) -> Result<Arc<dyn DeviceBuffer>, Error>;
}

impl crate::scope::Resource for Arc<dyn DeviceBuffer> {
    fn release(&self) -> Result<(), Error> {
        DeviceBuffer::release(self.as_ref())
    }
}
