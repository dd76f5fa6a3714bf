//! Tensor (C5): a `(dimensions, buffer)` pair plus view construction,
//! host/device transfer, and the numeric-boundary ingress/egress surface.
//! A tensor refers to but does not own its buffer (§9 "Tensor/buffer
//! relationship"); the enclosing [`scope`](crate::scope) owns it.

use std::ops::Range;
use std::sync::Arc;

use crate::context::Context;
use crate::dims::{Dimensions, Selector};
use crate::driver::{self, BufferUsage, Device, DeviceBuffer, Stream};
use crate::element::{DataType, Element, Scalar};
use crate::error::Error;
use crate::scope;

/// A `(dimensions, buffer)` view, tagged with the datatype its buffer is
/// tagged with and the stream any math dispatch against it will use.
#[derive(Debug, Clone)]
pub struct Tensor {
    dims: Dimensions,
    buffer: Arc<dyn DeviceBuffer>,
    datatype: DataType,
    stream: Arc<dyn Stream>,
}

/// A recursive nested sequence, the shape-aware counterpart to a flat
/// `Vec<T>`, produced by [`Tensor::to_nested_sequence`].
#[derive(Debug, Clone, PartialEq)]
pub enum NestedSequence<T> {
    /// A single scalar value (the rank-0 case, or a leaf of a deeper shape).
    Leaf(T),
    /// One nested sequence per entry of some axis.
    Nodes(Vec<NestedSequence<T>>),
}

/// Options for tensor-creating operations that allocate a fresh device
/// buffer: [`new_tensor`], [`Tensor::clone_to_device`], and
/// [`Tensor::clone_to_host`]. Each operation reads only the fields its
/// contract names; the rest are ignored.
#[derive(Clone, Default)]
pub struct TensorOptions {
    device: Option<Arc<dyn Device>>,
    stream: Option<Arc<dyn Stream>>,
    datatype: Option<DataType>,
    init_value: Option<Scalar>,
    force: Option<bool>,
    sync: Option<bool>,
}

impl TensorOptions {
    /// An empty set of options; every field falls back to the ambient
    /// context or the operation's documented default.
    #[must_use]
    pub fn new() -> TensorOptions {
        TensorOptions::default()
    }

    /// Overrides the target device.
    #[must_use]
    pub fn device(mut self, device: Arc<dyn Device>) -> TensorOptions {
        self.device = Some(device);
        self
    }

    /// Overrides the target stream.
    #[must_use]
    pub fn stream(mut self, stream: Arc<dyn Stream>) -> TensorOptions {
        self.stream = Some(stream);
        self
    }

    /// Overrides the element datatype.
    #[must_use]
    pub fn datatype(mut self, datatype: DataType) -> TensorOptions {
        self.datatype = Some(datatype);
        self
    }

    /// A value to broadcast-assign into every element after allocation
    /// ([`new_tensor`] only).
    #[must_use]
    pub fn init_value(mut self, value: Scalar) -> TensorOptions {
        self.init_value = Some(value);
        self
    }

    /// Allows [`Tensor::clone_to_device`] to proceed on non-access-increasing
    /// dimensions by compacting first.
    #[must_use]
    pub fn force(mut self, force: bool) -> TensorOptions {
        self.force = Some(force);
        self
    }

    /// Whether to block on [`Stream::sync_with_host`] before returning
    /// ([`Tensor::clone_to_device`]/[`Tensor::clone_to_host`]/[`to_tensor`]).
    #[must_use]
    pub fn sync(mut self, sync: bool) -> TensorOptions {
        self.sync = Some(sync);
        self
    }
}

/// Options for [`to_tensor`].
#[derive(Clone, Default)]
pub struct ToTensorOptions {
    device: Option<Arc<dyn Device>>,
    stream: Option<Arc<dyn Stream>>,
    datatype: Option<DataType>,
    shape: Option<Vec<usize>>,
    unchecked: Option<bool>,
    sync: Option<bool>,
}

impl ToTensorOptions {
    /// An empty set of options; `shape` defaults to a flat `[data.len()]`.
    #[must_use]
    pub fn new() -> ToTensorOptions {
        ToTensorOptions::default()
    }

    /// Overrides the target device.
    #[must_use]
    pub fn device(mut self, device: Arc<dyn Device>) -> ToTensorOptions {
        self.device = Some(device);
        self
    }

    /// Overrides the target stream.
    #[must_use]
    pub fn stream(mut self, stream: Arc<dyn Stream>) -> ToTensorOptions {
        self.stream = Some(stream);
        self
    }

    /// Converts the source data to this datatype instead of its native one.
    #[must_use]
    pub fn datatype(mut self, datatype: DataType) -> ToTensorOptions {
        self.datatype = Some(datatype);
        self
    }

    /// Interprets the flat source data under this shape instead of `[n]`.
    #[must_use]
    pub fn shape(mut self, shape: Vec<usize>) -> ToTensorOptions {
        self.shape = Some(shape);
        self
    }

    /// Allows an out-of-range datatype conversion to wrap instead of
    /// failing with [`Error::Domain`].
    #[must_use]
    pub fn unchecked(mut self, unchecked: bool) -> ToTensorOptions {
        self.unchecked = Some(unchecked);
        self
    }

    /// Whether to block on [`Stream::sync_with_host`] before returning.
    #[must_use]
    pub fn sync(mut self, sync: bool) -> ToTensorOptions {
        self.sync = Some(sync);
        self
    }
}

fn resolve_device(options_device: Option<Arc<dyn Device>>) -> Result<Arc<dyn Device>, Error> {
    match options_device {
        Some(device) => Ok(device),
        None => Context::current().device(),
    }
}

fn resolve_device_with_fallback(
    options_device: Option<Arc<dyn Device>>,
    fallback: impl FnOnce() -> Arc<dyn Device>,
) -> Arc<dyn Device> {
    options_device
        .or_else(|| Context::current().device().ok())
        .unwrap_or_else(fallback)
}

fn resolve_stream(options_stream: Option<Arc<dyn Stream>>, device: &Arc<dyn Device>) -> Arc<dyn Stream> {
    options_stream
        .or_else(|| Context::current().stream().ok())
        .unwrap_or_else(|| device.default_stream())
}

fn resolve_datatype(options_datatype: Option<DataType>) -> Result<DataType, Error> {
    match options_datatype {
        Some(datatype) => Ok(datatype),
        None => Context::current().datatype(),
    }
}

/// Allocates a device buffer of `values.len()` elements of `datatype` and
/// writes `values` into it, staging through a host buffer if the device
/// buffer is not itself host-addressable.
fn scatter_values(
    values: &[Scalar],
    datatype: DataType,
    device: &Arc<dyn Device>,
    stream: &Arc<dyn Stream>,
) -> Result<Arc<dyn DeviceBuffer>, Error> {
    let n = values.len();
    let buffer = device.allocate_device_buffer(n, datatype, BufferUsage::OneTime)?;
    if buffer.is_host() {
        for (i, &value) in values.iter().enumerate() {
            buffer.write_scalar(i, value)?;
        }
    } else {
        let host_driver = driver::registry::driver(stream.driver_name())?;
        let staging = host_driver.allocate_host_buffer(n, datatype, BufferUsage::OneTime)?;
        for (i, &value) in values.iter().enumerate() {
            staging.write_scalar(i, value)?;
        }
        stream.copy_host_to_device(staging.as_ref(), 0, buffer.as_ref(), 0, n)?;
    }
    Ok(buffer)
}

/// Allocates a device buffer of `∏ shape` elements of `options.datatype`
/// (defaulting to the ambient context's datatype), broadcast-assigning
/// `options.init_value` if given (§4.5).
///
/// # Errors
///
/// Returns [`Error::NoContext`] if no datatype or device is available,
/// [`Error::Shape`] if `shape` contains a zero entry, or [`Error::Device`]
/// on allocation failure.
pub fn new_tensor(shape: &[usize], options: TensorOptions) -> Result<Tensor, Error> {
    let datatype = resolve_datatype(options.datatype)?;
    let device = resolve_device(options.device)?;
    let stream = resolve_stream(options.stream, &device);
    let dims = Dimensions::new(shape)?;
    let buffer = device.allocate_device_buffer(dims.size(), datatype, BufferUsage::Reusable)?;
    scope::track(buffer.clone());
    let tensor = Tensor {
        dims,
        buffer,
        datatype,
        stream,
    };
    if let Some(value) = options.init_value {
        tensor.fill_with_scalar(value)?;
    }
    Ok(tensor)
}

/// Copies `data` into a host staging buffer, converts it to the target
/// datatype, and uploads it to the current device on the current stream
/// (§4.5).
///
/// # Errors
///
/// Returns [`Error::Shape`] if `options.shape`'s element count does not
/// match `data.len()`, [`Error::Domain`] on an out-of-range conversion
/// under `unchecked = false`, or [`Error::Device`] on backend failure.
pub fn to_tensor<T: Element>(data: &[T], options: ToTensorOptions) -> Result<Tensor, Error> {
    let shape = options.shape.clone().unwrap_or_else(|| vec![data.len()]);
    let dims = Dimensions::new(&shape)?;
    if dims.size() != data.len() {
        return Err(Error::Shape(format!(
            "to_tensor shape {shape:?} has {} elements, data has {}",
            dims.size(),
            data.len()
        )));
    }
    let unchecked = options.unchecked.unwrap_or(false);
    let datatype = options.datatype.unwrap_or(T::DATATYPE);
    let values: Vec<Scalar> = data
        .iter()
        .map(|&v| v.to_scalar().cast(datatype, unchecked))
        .collect::<Result<_, _>>()?;

    let device = resolve_device(options.device)?;
    let stream = resolve_stream(options.stream, &device);
    let buffer = scatter_values(&values, datatype, &device, &stream)?;
    scope::track(buffer.clone());
    if options.sync.unwrap_or(true) {
        stream.sync_with_host()?;
    }
    Ok(Tensor {
        dims,
        buffer,
        datatype,
        stream,
    })
}

impl Tensor {
    pub(crate) fn buffer(&self) -> &Arc<dyn DeviceBuffer> {
        &self.buffer
    }

    pub(crate) fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub(crate) fn stream(&self) -> &Arc<dyn Stream> {
        &self.stream
    }

    /// The element datatype this tensor's buffer is tagged with.
    #[must_use]
    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    /// This tensor's shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.dims.shape()
    }

    fn view(&self, dims: Dimensions) -> Tensor {
        Tensor {
            dims,
            buffer: self.buffer.clone(),
            datatype: self.datatype,
            stream: self.stream.clone(),
        }
    }

    fn fill_with_scalar(&self, value: Scalar) -> Result<(), Error> {
        let value = value.cast(self.datatype, true)?;
        if self.buffer.is_host() {
            for coord in self.dims.coordinates() {
                self.buffer.write_scalar(self.dims.linear_index(&coord), value)?;
            }
            return Ok(());
        }
        let host_driver = driver::registry::driver(self.stream.driver_name())?;
        let staging = host_driver.allocate_host_buffer(1, self.datatype, BufferUsage::OneTime)?;
        staging.write_scalar(0, value)?;
        for coord in self.dims.coordinates() {
            self.stream.copy_host_to_device(
                staging.as_ref(),
                0,
                self.buffer.as_ref(),
                self.dims.linear_index(&coord),
                1,
            )?;
        }
        self.stream.sync_with_host()
    }

    /// Reads every element into a flat, row-major `Vec<Scalar>`, staging a
    /// host copy one element at a time if this tensor's buffer is not
    /// already host-addressable.
    fn gather_host_scalars(&self) -> Result<Vec<Scalar>, Error> {
        if self.buffer.is_host() {
            return self
                .dims
                .coordinates()
                .map(|coord| self.buffer.read_scalar(self.dims.linear_index(&coord)))
                .collect();
        }
        let host_driver = driver::registry::driver(self.stream.driver_name())?;
        let staging = host_driver.allocate_host_buffer(1, self.datatype, BufferUsage::OneTime)?;
        let mut values = Vec::with_capacity(self.dims.size());
        for coord in self.dims.coordinates() {
            self.stream.copy_device_to_host(
                self.buffer.as_ref(),
                self.dims.linear_index(&coord),
                staging.as_ref(),
                0,
                1,
            )?;
            values.push(staging.read_scalar(0)?);
        }
        self.stream.sync_with_host()?;
        Ok(values)
    }

    /// Stages and uploads a dense copy of this tensor to a device,
    /// defaulting to the ambient context's device and this tensor's own
    /// stream's device if neither is given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor's dimensions are not
    /// access-increasing and `options.force` was not set, or
    /// [`Error::Device`] on backend failure.
    pub fn clone_to_device(&self, options: TensorOptions) -> Result<Tensor, Error> {
        if !self.dims.is_access_increasing() && !options.force.unwrap_or(false) {
            return Err(Error::Shape(
                "clone_to_device requires access-increasing dimensions unless force is set".into(),
            ));
        }
        let sync = options.sync.unwrap_or(true);
        let device = resolve_device_with_fallback(options.device, || self.stream.device());
        let stream = resolve_stream(options.stream, &device);
        let values = self.gather_host_scalars()?;
        let buffer = scatter_values(&values, self.datatype, &device, &stream)?;
        scope::track(buffer.clone());
        let dims = Dimensions::new(self.dims.shape())?;
        if sync {
            stream.sync_with_host()?;
        }
        Ok(Tensor {
            dims,
            buffer,
            datatype: self.datatype,
            stream,
        })
    }

    /// Stages a dense host-resident copy of this tensor. Defaults
    /// `sync = true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on backend failure.
    pub fn clone_to_host(&self, options: TensorOptions) -> Result<Tensor, Error> {
        let sync = options.sync.unwrap_or(true);
        let device = resolve_device_with_fallback(options.device, || self.stream.device());
        let stream = resolve_stream(options.stream, &device);
        let host_driver = driver::registry::driver(device.driver_name())?;
        let values = self.gather_host_scalars()?;
        let n = values.len();
        let buffer = host_driver.allocate_host_buffer(n, self.datatype, BufferUsage::OneTime)?;
        for (i, &value) in values.iter().enumerate() {
            buffer.write_scalar(i, value)?;
        }
        scope::track(buffer.clone());
        let dims = Dimensions::new(self.dims.shape())?;
        if sync {
            stream.sync_with_host()?;
        }
        Ok(Tensor {
            dims,
            buffer,
            datatype: self.datatype,
            stream,
        })
    }

    /// Returns a view over the same buffer under `new_dims`, with no copy.
    /// The caller is responsible for `new_dims` being a safe reading of the
    /// underlying storage; this only guards against reading past the end of
    /// the buffer (§9 "Tensor/buffer relationship").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `new_dims` could address past the end of
    /// this tensor's buffer.
    pub fn reinterpret(&self, new_dims: Dimensions) -> Result<Tensor, Error> {
        if self.buffer.len() > 0 && new_dims.max_linear_index() >= self.buffer.len() {
            return Err(Error::Shape(format!(
                "reinterpret needs at least {} elements, buffer has {}",
                new_dims.max_linear_index() + 1,
                self.buffer.len()
            )));
        }
        Ok(self.view(new_dims))
    }

    /// A view with one [`Selector`] applied per axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Select`] per [`Dimensions::select`].
    pub fn select(&self, selectors: &[Selector]) -> Result<Tensor, Error> {
        Ok(self.view(self.dims.select(selectors)?))
    }

    /// A view with axes reordered by `perm`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] per [`Dimensions::transpose`].
    pub fn transpose(&self, perm: &[usize]) -> Result<Tensor, Error> {
        Ok(self.view(self.dims.transpose(perm)?))
    }

    /// A view reshaped to `new_shape`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] per [`Dimensions::reshape`].
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor, Error> {
        Ok(self.view(self.dims.reshape(new_shape)?))
    }

    /// A flattened, rank-1 view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor is not dense and
    /// access-increasing.
    pub fn as_vector(&self) -> Result<Tensor, Error> {
        self.reshape(&[self.dims.size()])
    }

    /// A `[product_of_leading_axes, last_axis]` view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor is not dense and
    /// access-increasing.
    pub fn as_2d(&self) -> Result<Tensor, Error> {
        let [leading, last] = self.dims.as_2d_shape();
        self.reshape(&[leading, last])
    }

    /// A `[first_axis, product_of_trailing_axes]` view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor is not dense and
    /// access-increasing.
    pub fn as_batch(&self) -> Result<Tensor, Error> {
        let [first, trailing] = self.dims.as_batch_shape();
        self.reshape(&[first, trailing])
    }

    /// A view over rows `range` of a rank-2 tensor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor is not rank 2, or
    /// [`Error::Select`] if `range` is invalid.
    pub fn rows(&self, range: Range<usize>) -> Result<Tensor, Error> {
        if self.dims.rank() != 2 {
            return Err(Error::Shape(format!(
                "rows requires rank 2, got rank {}",
                self.dims.rank()
            )));
        }
        self.select(&[Selector::Range(range), Selector::All])
    }

    /// A view over columns `range` of a rank-2 tensor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if this tensor is not rank 2, or
    /// [`Error::Select`] if `range` is invalid.
    pub fn columns(&self, range: Range<usize>) -> Result<Tensor, Error> {
        if self.dims.rank() != 2 {
            return Err(Error::Shape(format!(
                "columns requires rank 2, got rank {}",
                self.dims.rank()
            )));
        }
        self.select(&[Selector::All, Selector::Range(range)])
    }

    /// Whether this tensor's strides equal the natural row-major strides
    /// for its shape.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.dims.is_dense()
    }

    /// Whether this tensor is dense, access-increasing, and has zero
    /// offset.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.dims.is_simple()
    }

    /// True iff `self` and `other` share backing storage and their element
    /// ranges overlap.
    #[must_use]
    pub fn partial_aliases(&self, other: &Tensor) -> bool {
        driver::partial_aliases(self.buffer.as_ref(), other.buffer.as_ref())
    }

    /// True iff `self` and `other` share backing storage and cover the
    /// identical element range.
    #[must_use]
    pub fn aliases(&self, other: &Tensor) -> bool {
        driver::aliases(self.buffer.as_ref(), other.buffer.as_ref())
    }

    /// Stages a host copy (if not already host-resident) and decodes it
    /// into a flat, row-major `Vec<T>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if an element does not fit `T::DATATYPE`,
    /// or [`Error::Device`] on backend failure.
    pub fn to_flat_vec<T: Element>(&self) -> Result<Vec<T>, Error> {
        self.gather_host_scalars()?
            .into_iter()
            .map(|value| value.cast(T::DATATYPE, false).map(T::from_scalar))
            .collect()
    }

    /// The nested-sequence counterpart to [`Tensor::to_flat_vec`], shaped
    /// to match this tensor's dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if an element does not fit `T::DATATYPE`,
    /// or [`Error::Device`] on backend failure.
    pub fn to_nested_sequence<T: Element>(&self) -> Result<NestedSequence<T>, Error> {
        let flat = self.to_flat_vec::<T>()?;
        Ok(nest(&flat, self.dims.shape()))
    }
}

fn nest<T: Clone>(flat: &[T], shape: &[usize]) -> NestedSequence<T> {
    match shape.split_first() {
        None => NestedSequence::Leaf(flat[0].clone()),
        Some((&extent, rest)) => {
            let chunk_size: usize = rest.iter().product();
            let nodes = (0..extent)
                .map(|i| nest(&flat[i * chunk_size..(i + 1) * chunk_size], rest))
                .collect();
            NestedSequence::Nodes(nodes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu;
    use crate::context::ContextOptions;
    use crate::scope::with_scope;

    fn in_cpu_context<T>(body: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        let driver = cpu::driver();
        let device = driver.enumerate_devices().remove(0);
        crate::context::with_context(
            ContextOptions::new().driver(driver).device(device).datatype(DataType::F64),
            body,
        )
    }

    #[test]
    fn round_trip_through_to_tensor_and_nested_sequence() {
        with_scope(|| {
            in_cpu_context(|| {
                let data: Vec<f64> = (0..9).map(f64::from).collect();
                let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![3, 3]))?;
                let nested = tensor.to_nested_sequence::<f64>()?;
                assert_eq!(
                    nested,
                    NestedSequence::Nodes(vec![
                        NestedSequence::Nodes(vec![
                            NestedSequence::Leaf(0.0),
                            NestedSequence::Leaf(1.0),
                            NestedSequence::Leaf(2.0)
                        ]),
                        NestedSequence::Nodes(vec![
                            NestedSequence::Leaf(3.0),
                            NestedSequence::Leaf(4.0),
                            NestedSequence::Leaf(5.0)
                        ]),
                        NestedSequence::Nodes(vec![
                            NestedSequence::Leaf(6.0),
                            NestedSequence::Leaf(7.0),
                            NestedSequence::Leaf(8.0)
                        ]),
                    ])
                );
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn clone_to_device_then_host_round_trips() {
        with_scope(|| {
            in_cpu_context(|| {
                let data: Vec<f64> = (0..4).map(f64::from).collect();
                let tensor = to_tensor(&data, ToTensorOptions::new())?;
                let device_copy = tensor.clone_to_device(TensorOptions::new())?;
                let host_copy = device_copy.clone_to_host(TensorOptions::new())?;
                assert_eq!(host_copy.to_flat_vec::<f64>()?, data);
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn select_produces_overlapping_view() {
        with_scope(|| {
            in_cpu_context(|| {
                let data: Vec<f64> = (0..9).map(f64::from).collect();
                let tensor = to_tensor(&data, ToTensorOptions::new().shape(vec![3, 3]))?;
                let sub = tensor.select(&[Selector::Range(0..2), Selector::Range(0..2)])?;
                assert!(sub.partial_aliases(&tensor));
                assert_eq!(sub.to_flat_vec::<f64>()?, vec![0.0, 1.0, 3.0, 4.0]);
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn new_tensor_applies_init_value() {
        with_scope(|| {
            in_cpu_context(|| {
                let tensor = new_tensor(&[2, 2], TensorOptions::new().init_value(Scalar::F64(7.0)))?;
                assert_eq!(tensor.to_flat_vec::<f64>()?, vec![7.0, 7.0, 7.0, 7.0]);
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn reinterpret_rejects_out_of_bounds_dims() {
        with_scope(|| {
            in_cpu_context(|| {
                let data: Vec<f64> = (0..4).map(f64::from).collect();
                let tensor = to_tensor(&data, ToTensorOptions::new())?;
                let too_big = Dimensions::new(&[8])?;
                assert!(tensor.reinterpret(too_big).is_err());
                Ok(())
            })
        })
        .unwrap();
    }
}
