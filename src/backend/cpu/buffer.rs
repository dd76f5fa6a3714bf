//! The CPU reference backend's [`DeviceBuffer`] implementation: a
//! reference-counted byte-backed allocation (`Backing`) plus a typed,
//! offset/length view over it (`CpuBuffer`).

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::{BackingId, DeviceBuffer};
use crate::element::{DataType, Scalar};
use crate::error::Error;

static NEXT_BACKING_ID: AtomicU64 = AtomicU64::new(0);

/// The shared allocation a family of [`CpuBuffer`] views may point into.
#[derive(Debug)]
pub(super) struct Backing {
    id: BackingId,
    pub(super) bytes: Mutex<Vec<u8>>,
}

/// A host-addressable, element-typed view over a [`Backing`] allocation.
#[derive(Debug, Clone)]
pub struct CpuBuffer {
    pub(super) backing: Arc<Backing>,
    datatype: DataType,
    pub(super) offset: usize,
    len: usize,
}

impl CpuBuffer {
    /// Allocates a fresh, zero-initialized backing of `n` elements of type
    /// `dt` and returns a view over the whole of it.
    pub(super) fn allocate(n: usize, dt: DataType) -> CpuBuffer {
        let id = BackingId(NEXT_BACKING_ID.fetch_add(1, Ordering::Relaxed));
        let backing = Arc::new(Backing {
            id,
            bytes: Mutex::new(vec![0_u8; n * dt.byte_width()]),
        });
        CpuBuffer {
            backing,
            datatype: dt,
            offset: 0,
            len: n,
        }
    }

    /// The absolute element offset this view's index `index` maps to within
    /// the shared backing allocation.
    pub(super) fn absolute(&self, index: usize) -> usize {
        self.offset + index
    }
}

impl DeviceBuffer for CpuBuffer {
    fn datatype(&self) -> DataType {
        self.datatype
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_host(&self) -> bool {
        true
    }

    fn backing_id(&self) -> BackingId {
        self.backing.id
    }

    fn backing_range(&self) -> (usize, usize) {
        (self.offset, self.offset + self.len)
    }

    fn sub_buffer(&self, offset: usize, len: usize) -> Result<Arc<dyn DeviceBuffer>, Error> {
        if offset + len > self.len {
            return Err(Error::Shape(format!(
                "sub_buffer({offset}, {len}) exceeds buffer of length {}",
                self.len
            )));
        }
        Ok(Arc::new(CpuBuffer {
            backing: Arc::clone(&self.backing),
            datatype: self.datatype,
            offset: self.offset + offset,
            len,
        }))
    }

    fn release(&self) -> Result<(), Error> {
        if Arc::strong_count(&self.backing) > 1 {
            return Err(Error::Resource {
                primary: Box::new(Error::Device(
                    "cannot release buffer: a sub-buffer view is still outstanding".into(),
                )),
                secondary: Vec::new(),
            });
        }
        Ok(())
    }

    fn read_scalar(&self, index: usize) -> Result<Scalar, Error> {
        let width = self.datatype.byte_width();
        let at = self.absolute(index);
        let bytes = self.backing.bytes.lock().expect("backing mutex poisoned");
        Ok(Scalar::read_le_bytes(&bytes[at * width..(at + 1) * width], self.datatype))
    }

    fn write_scalar(&self, index: usize, value: Scalar) -> Result<(), Error> {
        let width = self.datatype.byte_width();
        let at = self.absolute(index);
        let converted = value.cast(self.datatype, true)?;
        let mut bytes = self.backing.bytes.lock().expect("backing mutex poisoned");
        converted.write_le_bytes(&mut bytes[at * width..(at + 1) * width]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
