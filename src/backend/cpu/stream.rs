//! The CPU reference backend's [`Stream`] implementation. Every operation
//! executes synchronously at enqueue time, so events, waits, and syncs are
//! bookkeeping only; the real work is the C6 math dispatch table and the
//! three copy operations.

use std::sync::{Arc, Mutex, Weak};

use crate::dims::Dimensions;
use crate::driver::{Device, DeviceBuffer, Event, Stream};
use crate::element::{DataType, Scalar};
use crate::error::Error;
use crate::math::{BinaryOp, Distribution, ReductionOp, UnaryOp};

use super::buffer::CpuBuffer;
use super::device::CpuDevice;

/// The CPU backend's [`Stream`]: a monotonic sequence counter plus a
/// back-pointer to the device that created it. No queue is actually
/// buffered; everything below runs inline.
#[derive(Debug)]
pub struct CpuStream {
    device: Weak<CpuDevice>,
    sequence: Mutex<u64>,
}

impl CpuStream {
    pub(super) fn new(device: Weak<CpuDevice>) -> CpuStream {
        CpuStream {
            device,
            sequence: Mutex::new(0),
        }
    }

    fn owning_device(&self) -> Arc<dyn Device> {
        self.device.upgrade().expect("CpuStream outlived its own CpuDevice") as Arc<dyn Device>
    }
}

fn as_cpu_buffer<'a>(buffer: &'a dyn DeviceBuffer, role: &str) -> Result<&'a CpuBuffer, Error> {
    buffer
        .as_any()
        .downcast_ref::<CpuBuffer>()
        .ok_or_else(|| Error::Device(format!("{role} buffer is not a CPU backend buffer")))
}

fn require_matching_datatype(a: &dyn DeviceBuffer, b: &dyn DeviceBuffer) -> Result<DataType, Error> {
    if a.datatype() != b.datatype() {
        return Err(Error::Device(format!(
            "datatype mismatch in copy: {} vs {}",
            a.datatype(),
            b.datatype()
        )));
    }
    Ok(a.datatype())
}

/// Copies `n` elements between two [`CpuBuffer`]s, avoiding a Mutex
/// self-deadlock when both views share the same backing allocation.
fn raw_copy(
    src: &dyn DeviceBuffer,
    src_off: usize,
    dst: &dyn DeviceBuffer,
    dst_off: usize,
    n: usize,
) -> Result<(), Error> {
    let dt = require_matching_datatype(src, dst)?;
    let width = dt.byte_width();
    let src = as_cpu_buffer(src, "copy source")?;
    let dst = as_cpu_buffer(dst, "copy destination")?;
    let src_start = src.absolute(src_off) * width;
    let dst_start = dst.absolute(dst_off) * width;
    let len = n * width;

    if Arc::ptr_eq(&src.backing, &dst.backing) {
        let mut bytes = dst.backing.bytes.lock().expect("backing mutex poisoned");
        bytes.copy_within(src_start..src_start + len, dst_start);
    } else {
        let chunk = {
            let bytes = src.backing.bytes.lock().expect("backing mutex poisoned");
            bytes[src_start..src_start + len].to_vec()
        };
        let mut bytes = dst.backing.bytes.lock().expect("backing mutex poisoned");
        bytes[dst_start..dst_start + len].copy_from_slice(&chunk);
    }
    Ok(())
}

/// Per-axis modular index of `dest_coord` against `operand_dims`, giving the
/// broadcast-aware linear index to read from for a commensurate operand
/// (mirrors [`crate::math::broadcast_pairs`] for the multi-operand case).
fn broadcast_index(operand_dims: &Dimensions, dest_coord: &[usize]) -> usize {
    let coord: Vec<usize> = dest_coord
        .iter()
        .zip(operand_dims.shape())
        .map(|(&c, &extent)| c % extent)
        .collect();
    operand_dims.linear_index(&coord)
}

fn apply_unary_fn(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Floor => x.floor(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Round => x.round(),
        UnaryOp::Negate => -x,
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Logistic => 1.0 / (1.0 + (-x).exp()),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Noop => x,
    }
}

fn apply_binary_fn(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Max => x.max(y),
        BinaryOp::Min => x.min(y),
        BinaryOp::BitAnd => ((x as i128) & (y as i128)) as f64,
        BinaryOp::BitXor => ((x as i128) ^ (y as i128)) as f64,
        BinaryOp::Eq => f64::from(x == y),
        BinaryOp::Gt => f64::from(x > y),
        BinaryOp::Ge => f64::from(x >= y),
        BinaryOp::Lt => f64::from(x < y),
        BinaryOp::Le => f64::from(x <= y),
    }
}

impl Stream for CpuStream {
    fn driver_name(&self) -> &str {
        "cpu"
    }

    fn device(&self) -> Arc<dyn Device> {
        self.owning_device()
    }

    fn copy_host_to_device(
        &self,
        host: &dyn DeviceBuffer,
        host_off: usize,
        dev: &dyn DeviceBuffer,
        dev_off: usize,
        n: usize,
    ) -> Result<(), Error> {
        raw_copy(host, host_off, dev, dev_off, n)
    }

    fn copy_device_to_host(
        &self,
        dev: &dyn DeviceBuffer,
        dev_off: usize,
        host: &dyn DeviceBuffer,
        host_off: usize,
        n: usize,
    ) -> Result<(), Error> {
        raw_copy(dev, dev_off, host, host_off, n)
    }

    fn copy_device_to_device(
        &self,
        src: &dyn DeviceBuffer,
        src_off: usize,
        dst: &dyn DeviceBuffer,
        dst_off: usize,
        n: usize,
    ) -> Result<(), Error> {
        raw_copy(src, src_off, dst, dst_off, n)
    }

    fn sync_with_host(&self) -> Result<(), Error> {
        Ok(())
    }

    fn insert_event(&self) -> Event {
        let mut sequence = self.sequence.lock().expect("sequence mutex poisoned");
        *sequence += 1;
        Event {
            driver_name: "cpu",
            sequence: *sequence,
        }
    }

    fn wait_event(&self, _event: &Event) -> Result<(), Error> {
        Ok(())
    }

    fn unary(
        &self,
        op: UnaryOp,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        x: &dyn DeviceBuffer,
        x_dims: &Dimensions,
    ) -> Result<(), Error> {
        let dt = dest.datatype();
        let alpha = alpha.to_f64();
        for coord in dest_dims.coordinates() {
            let dest_idx = dest_dims.linear_index(&coord);
            let x_idx = broadcast_index(x_dims, &coord);
            let value = apply_unary_fn(op, alpha * x.read_scalar(x_idx)?.to_f64());
            dest.write_scalar(dest_idx, Scalar::F64(value).cast(dt, true)?)?;
        }
        Ok(())
    }

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
    ) -> Result<(), Error> {
        let dt = dest.datatype();
        let (alpha, beta) = (alpha.to_f64(), beta.to_f64());
        for coord in dest_dims.coordinates() {
            let dest_idx = dest_dims.linear_index(&coord);
            let x_idx = broadcast_index(x_dims, &coord);
            let y_idx = broadcast_index(y_dims, &coord);
            let lhs = alpha * x.read_scalar(x_idx)?.to_f64();
            let rhs = beta * y.read_scalar(y_idx)?.to_f64();
            let value = apply_binary_fn(op, lhs, rhs);
            dest.write_scalar(dest_idx, Scalar::F64(value).cast(dt, true)?)?;
        }
        Ok(())
    }

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
    ) -> Result<(), Error> {
        let dt = dest.datatype();
        let (alpha, beta, gamma) = (alpha.to_f64(), beta.to_f64(), gamma.to_f64());
        for coord in dest_dims.coordinates() {
            let dest_idx = dest_dims.linear_index(&coord);
            let x_idx = broadcast_index(x_dims, &coord);
            let y_idx = broadcast_index(y_dims, &coord);
            let z_idx = broadcast_index(z_dims, &coord);
            let condition = alpha * x.read_scalar(x_idx)?.to_f64();
            let value = if condition >= 0.0 {
                beta * y.read_scalar(y_idx)?.to_f64()
            } else {
                gamma * z.read_scalar(z_idx)?.to_f64()
            };
            dest.write_scalar(dest_idx, Scalar::F64(value).cast(dt, true)?)?;
        }
        Ok(())
    }

    fn reduction(
        &self,
        op: ReductionOp,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        alpha: Scalar,
        input: &dyn DeviceBuffer,
        input_dims: &Dimensions,
    ) -> Result<(), Error> {
        let dt = dest.datatype();
        let alpha = alpha.to_f64();
        let axis_len = *input_dims.shape().last().unwrap_or(&1);
        for dest_coord in dest_dims.coordinates() {
            let dest_idx = dest_dims.linear_index(&dest_coord);
            let mut sum = 0.0_f64;
            let mut sum_sq = 0.0_f64;
            let mut max = f64::NEG_INFINITY;
            let mut min = f64::INFINITY;
            for k in 0..axis_len {
                let mut input_coord = dest_coord.clone();
                input_coord.push(k);
                let input_idx = input_dims.linear_index(&input_coord);
                let value = alpha * input.read_scalar(input_idx)?.to_f64();
                sum += value;
                sum_sq += value * value;
                max = max.max(value);
                min = min.min(value);
            }
            let value = match op {
                ReductionOp::Max => max,
                ReductionOp::Min => min,
                ReductionOp::Sum => sum,
                ReductionOp::Mean => sum / axis_len as f64,
                ReductionOp::SquaredMagnitude => sum_sq,
                ReductionOp::Magnitude => sum_sq.sqrt(),
            };
            dest.write_scalar(dest_idx, Scalar::F64(value).cast(dt, true)?)?;
        }
        Ok(())
    }

    #[allow(unsafe_code)]
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
    ) -> Result<(), Error> {
        let dt = c.datatype();
        let c = as_cpu_buffer(c, "gemm C")?;
        let a = as_cpu_buffer(a, "gemm A")?;
        let b = as_cpu_buffer(b, "gemm B")?;
        let abs_a = a.absolute(a_offset);
        let abs_b = b.absolute(b_offset);
        let abs_c = c.absolute(c_offset);

        let a_bytes = a.backing.bytes.lock().expect("backing mutex poisoned").clone();
        let b_bytes = b.backing.bytes.lock().expect("backing mutex poisoned").clone();

        match dt {
            DataType::F32 => {
                let a_slice: &[f32] = bytemuck::cast_slice(&a_bytes);
                let b_slice: &[f32] = bytemuck::cast_slice(&b_bytes);
                let (rsa, csa) = trans_strides(trans_a, column_stride_a);
                let (rsb, csb) = trans_strides(trans_b, column_stride_b);
                let mut c_guard = c.backing.bytes.lock().expect("backing mutex poisoned");
                let c_vec: &mut Vec<u8> = &mut c_guard;
                let c_slice: &mut [f32] = bytemuck::cast_slice_mut(c_vec);
                unsafe {
                    matrixmultiply::sgemm(
                        rows_a,
                        cols_a,
                        cols_b,
                        alpha.cast(DataType::F32, true)?.to_f64() as f32,
                        a_slice[abs_a..].as_ptr(),
                        rsa,
                        csa,
                        b_slice[abs_b..].as_ptr(),
                        rsb,
                        csb,
                        beta.cast(DataType::F32, true)?.to_f64() as f32,
                        c_slice[abs_c..].as_mut_ptr(),
                        column_stride_c as isize,
                        1,
                    );
                }
            }
            DataType::F64 => {
                let a_slice: &[f64] = bytemuck::cast_slice(&a_bytes);
                let b_slice: &[f64] = bytemuck::cast_slice(&b_bytes);
                let (rsa, csa) = trans_strides(trans_a, column_stride_a);
                let (rsb, csb) = trans_strides(trans_b, column_stride_b);
                let mut c_guard = c.backing.bytes.lock().expect("backing mutex poisoned");
                let c_vec: &mut Vec<u8> = &mut c_guard;
                let c_slice: &mut [f64] = bytemuck::cast_slice_mut(c_vec);
                unsafe {
                    matrixmultiply::dgemm(
                        rows_a,
                        cols_a,
                        cols_b,
                        alpha.to_f64(),
                        a_slice[abs_a..].as_ptr(),
                        rsa,
                        csa,
                        b_slice[abs_b..].as_ptr(),
                        rsb,
                        csb,
                        beta.to_f64(),
                        c_slice[abs_c..].as_mut_ptr(),
                        column_stride_c as isize,
                        1,
                    );
                }
            }
            _ => {
                let mut c_guard = c.backing.bytes.lock().expect("backing mutex poisoned");
                let c_vec: &mut Vec<u8> = &mut c_guard;
                naive_gemm(
                    dt,
                    &a_bytes,
                    abs_a,
                    rows_a,
                    cols_a,
                    column_stride_a,
                    trans_a,
                    &b_bytes,
                    abs_b,
                    cols_b,
                    column_stride_b,
                    trans_b,
                    alpha,
                    beta,
                    c_vec,
                    abs_c,
                    column_stride_c,
                )?
            }
        }
        Ok(())
    }

    fn rand(
        &self,
        dest: &dyn DeviceBuffer,
        dest_dims: &Dimensions,
        distribution: Distribution,
        seed: Option<u64>,
    ) -> Result<(), Error> {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution as _, Normal, Uniform};

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        for coord in dest_dims.coordinates() {
            let idx = dest_dims.linear_index(&coord);
            let value: f32 = match distribution {
                Distribution::Gaussian { mean, variance } => {
                    let normal = Normal::new(mean, variance.sqrt())
                        .map_err(|err| Error::Device(format!("invalid gaussian distribution: {err}")))?;
                    normal.sample(&mut rng)
                }
                Distribution::Flat { min, max } => {
                    let uniform = Uniform::new(min, max)
                        .map_err(|err| Error::Device(format!("invalid flat distribution: {err}")))?;
                    uniform.sample(&mut rng)
                }
            };
            dest.write_scalar(idx, Scalar::F32(value))?;
        }
        Ok(())
    }
}

/// BLAS-style row/column element strides for a physically dense `m x n`
/// operand whose logical orientation is the transpose of its storage iff
/// `transposed`.
fn trans_strides(transposed: bool, column_stride: usize) -> (isize, isize) {
    if transposed {
        (1, column_stride as isize)
    } else {
        (column_stride as isize, 1)
    }
}

fn read_at(bytes: &[u8], dt: DataType, idx: usize) -> f64 {
    let width = dt.byte_width();
    Scalar::read_le_bytes(&bytes[idx * width..(idx + 1) * width], dt).to_f64()
}

fn write_at(bytes: &mut [u8], dt: DataType, idx: usize, value: f64) -> Result<(), Error> {
    let width = dt.byte_width();
    let scalar = Scalar::F64(value).cast(dt, true)?;
    scalar.write_le_bytes(&mut bytes[idx * width..(idx + 1) * width]);
    Ok(())
}

/// Naive triple-loop gemm for the integer datatypes, which `matrixmultiply`
/// does not support.
#[allow(clippy::too_many_arguments)]
fn naive_gemm(
    dt: DataType,
    a_bytes: &[u8],
    abs_a: usize,
    m: usize,
    k: usize,
    column_stride_a: usize,
    trans_a: bool,
    b_bytes: &[u8],
    abs_b: usize,
    n: usize,
    column_stride_b: usize,
    trans_b: bool,
    alpha: Scalar,
    beta: Scalar,
    c_bytes: &mut [u8],
    abs_c: usize,
    column_stride_c: usize,
) -> Result<(), Error> {
    let a_index = |i: usize, l: usize| if trans_a { l * column_stride_a + i } else { i * column_stride_a + l };
    let b_index = |l: usize, j: usize| if trans_b { j * column_stride_b + l } else { l * column_stride_b + j };
    let (alpha, beta) = (alpha.to_f64(), beta.to_f64());
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f64;
            for l in 0..k {
                let a_value = read_at(a_bytes, dt, abs_a + a_index(i, l));
                let b_value = read_at(b_bytes, dt, abs_b + b_index(l, j));
                acc += a_value * b_value;
            }
            let c_idx = abs_c + i * column_stride_c + j;
            let previous = read_at(c_bytes, dt, c_idx);
            write_at(c_bytes, dt, c_idx, alpha * acc + beta * previous)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu;
    use crate::dims::Dimensions;
    use crate::driver::BufferUsage;

    fn stream_and_device() -> (Arc<dyn Stream>, Arc<dyn Device>) {
        let driver = cpu::driver();
        let device = driver.enumerate_devices().remove(0);
        (device.default_stream(), device)
    }

    #[test]
    fn binary_add_broadcasts_smaller_operand() {
        let (stream, device) = stream_and_device();
        let dest = device.allocate_device_buffer(6, DataType::I32, BufferUsage::OneTime).unwrap();
        let x = device.allocate_device_buffer(6, DataType::I32, BufferUsage::OneTime).unwrap();
        let y = device.allocate_device_buffer(3, DataType::I32, BufferUsage::OneTime).unwrap();
        for (i, value) in [1, 2, 3, 4, 5, 6].into_iter().enumerate() {
            x.write_scalar(i, Scalar::I32(value)).unwrap();
        }
        for (i, value) in [10, 20, 30].into_iter().enumerate() {
            y.write_scalar(i, Scalar::I32(value)).unwrap();
        }
        let dest_dims = Dimensions::new(&[6]).unwrap();
        let y_dims = Dimensions::new(&[3]).unwrap();
        stream
            .binary(
                BinaryOp::Add,
                dest.as_ref(),
                &dest_dims,
                Scalar::I32(1),
                x.as_ref(),
                &dest_dims,
                Scalar::I32(1),
                y.as_ref(),
                &y_dims,
            )
            .unwrap();
        let result: Vec<i32> = (0..6)
            .map(|i| match dest.read_scalar(i).unwrap() {
                Scalar::I32(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(result, vec![11, 22, 33, 14, 25, 36]);
    }

    #[test]
    fn reduction_magnitude_over_last_axis() {
        let (stream, device) = stream_and_device();
        let input = device.allocate_device_buffer(4, DataType::F32, BufferUsage::OneTime).unwrap();
        for (i, value) in [3.0_f32, 4.0, 0.0, 5.0].into_iter().enumerate() {
            input.write_scalar(i, Scalar::F32(value)).unwrap();
        }
        let dest = device.allocate_device_buffer(2, DataType::F32, BufferUsage::OneTime).unwrap();
        let input_dims = Dimensions::new(&[2, 2]).unwrap();
        let dest_dims = Dimensions::new(&[2]).unwrap();
        stream
            .reduction(
                ReductionOp::Magnitude,
                dest.as_ref(),
                &dest_dims,
                Scalar::F32(1.0),
                input.as_ref(),
                &input_dims,
            )
            .unwrap();
        for i in 0..2 {
            match dest.read_scalar(i).unwrap() {
                Scalar::F32(v) => assert!((v - 5.0).abs() < 1e-5),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn gemm_matches_known_product() {
        let (stream, device) = stream_and_device();
        let a = device.allocate_device_buffer(4, DataType::F32, BufferUsage::OneTime).unwrap();
        let b = device.allocate_device_buffer(4, DataType::F32, BufferUsage::OneTime).unwrap();
        let c = device.allocate_device_buffer(4, DataType::F32, BufferUsage::OneTime).unwrap();
        for (i, value) in [1.0_f32, 2.0, 3.0, 4.0].into_iter().enumerate() {
            a.write_scalar(i, Scalar::F32(value)).unwrap();
        }
        for (i, value) in [5.0_f32, 6.0, 7.0, 8.0].into_iter().enumerate() {
            b.write_scalar(i, Scalar::F32(value)).unwrap();
        }
        for i in 0..4 {
            c.write_scalar(i, Scalar::F32(0.0)).unwrap();
        }
        stream
            .gemm(
                c.as_ref(),
                0,
                2,
                false,
                false,
                Scalar::F32(1.0),
                a.as_ref(),
                0,
                2,
                2,
                2,
                b.as_ref(),
                0,
                2,
                2,
                Scalar::F32(0.0),
            )
            .unwrap();
        let result: Vec<f32> = (0..4)
            .map(|i| match c.read_scalar(i).unwrap() {
                Scalar::F32(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(result, vec![19.0, 22.0, 43.0, 50.0]);
    }
}
