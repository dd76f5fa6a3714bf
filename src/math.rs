//! Math dispatch (C6): the per-stream operation table, plus the shape,
//! datatype, and aliasing validation that happens at the dispatch boundary
//! before any backend call (§7 "never partially committed").

use crate::dims::{self, Dimensions};
use crate::driver::{self as driver_mod};
use crate::element::{DataType, Scalar};
use crate::error::Error;
use crate::tensor::Tensor;

/// Unary operations: `dest = f(alpha * x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnaryOp {
    /// Round toward negative infinity.
    Floor,
    /// Round toward positive infinity.
    Ceil,
    /// Round to nearest, ties away from zero.
    Round,
    /// `-x`.
    Negate,
    /// Hyperbolic tangent.
    Tanh,
    /// Sigmoid / logistic function.
    Logistic,
    /// `e^x`.
    Exp,
    /// Square root.
    Sqrt,
    /// Identity (copy, with scaling).
    Noop,
}

/// Binary operations: `dest = (alpha * x) op (beta * y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
    /// Bitwise AND (integer datatypes only).
    BitAnd,
    /// Bitwise XOR (integer datatypes only).
    BitXor,
    /// Equality, `1`/`0` result.
    Eq,
    /// Greater-than, `1`/`0` result.
    Gt,
    /// Greater-or-equal, `1`/`0` result.
    Ge,
    /// Less-than, `1`/`0` result.
    Lt,
    /// Less-or-equal, `1`/`0` result.
    Le,
}

/// Reductions along a tensor's last axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReductionOp {
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// Sum.
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Sum of squares (squared Euclidean magnitude).
    SquaredMagnitude,
    /// Euclidean magnitude.
    Magnitude,
}

/// Sampling distributions for the `rand` op. `f32` only.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum Distribution {
    /// Normal distribution with the given mean and variance.
    Gaussian {
        /// Mean.
        mean: f32,
        /// Variance (not standard deviation).
        variance: f32,
    },
    /// Uniform distribution over `[min, max)`.
    Flat {
        /// Inclusive lower bound.
        min: f32,
        /// Exclusive upper bound.
        max: f32,
    },
}

fn require_same_datatype(tensors: &[&Tensor]) -> Result<DataType, Error> {
    let dt = tensors[0].datatype();
    if tensors.iter().all(|t| t.datatype() == dt) {
        Ok(dt)
    } else {
        Err(Error::Shape(format!(
            "operands must share a datatype, got {:?}",
            tensors.iter().map(Tensor::datatype).collect::<Vec<_>>()
        )))
    }
}

/// Checks that `dest` does not conflict-alias `operand`: an overlap is only
/// safe when `dest` and `operand` describe the identical index set (a true
/// in-place map), since elementwise ops read and write each index exactly
/// once.
fn check_elementwise_alias(dest: &Tensor, operand: &Tensor) -> Result<(), Error> {
    let overlaps = driver_mod::partial_aliases(dest.buffer().as_ref(), operand.buffer().as_ref());
    if overlaps && dest.dims() != operand.dims() {
        return Err(Error::Alias(format!(
            "destination and operand overlap with different index sets: {:?} vs {:?}",
            dest.dims(),
            operand.dims()
        )));
    }
    Ok(())
}

fn check_commensurate_pair(dest: &Tensor, operand: &Tensor) -> Result<(), Error> {
    if !dims::commensurate(dest.dims().shape(), operand.dims().shape()) {
        return Err(Error::Shape(format!(
            "shapes {:?} and {:?} are not commensurate",
            dest.dims().shape(),
            operand.dims().shape()
        )));
    }
    Ok(())
}

fn check_broadcast_binary(dest: &Tensor, x: &Tensor, y: &Tensor) -> Result<(), Error> {
    if !dims::commensurate(x.dims().shape(), y.dims().shape()) {
        return Err(Error::Shape(format!(
            "operand shapes {:?} and {:?} are not commensurate",
            x.dims().shape(),
            y.dims().shape()
        )));
    }
    let expected = dims::broadcast_shape(x.dims().shape(), y.dims().shape());
    if dest.dims().shape() != expected.as_slice() {
        return Err(Error::Shape(format!(
            "destination shape {:?} does not match broadcast shape {:?}",
            dest.dims().shape(),
            expected
        )));
    }
    Ok(())
}

/// Dispatches a unary operation. `dest` and `x` must have identical shapes.
///
/// # Errors
///
/// Returns [`Error::Shape`] on shape/datatype mismatch, [`Error::Alias`] if
/// `dest` partially overlaps `x` with a different index set, or
/// [`Error::Device`] on backend failure.
pub fn unary(op: UnaryOp, dest: &Tensor, alpha: Scalar, x: &Tensor) -> Result<(), Error> {
    require_same_datatype(&[dest, x])?;
    if dest.dims().shape() != x.dims().shape() {
        return Err(Error::Shape(format!(
            "unary destination shape {:?} must match operand shape {:?}",
            dest.dims().shape(),
            x.dims().shape()
        )));
    }
    check_elementwise_alias(dest, x)?;
    dest.stream().unary(
        op,
        dest.buffer().as_ref(),
        dest.dims(),
        alpha,
        x.buffer().as_ref(),
        x.dims(),
    )
}

/// Dispatches a binary operation with commensurate broadcasting (§4.3).
///
/// # Errors
///
/// Returns [`Error::Shape`] if operand shapes are not commensurate or
/// `dest`'s shape is not their per-axis maximum, [`Error::Alias`] on an
/// unsafe overlap, or [`Error::Device`] on backend failure.
pub fn binary(
    op: BinaryOp,
    dest: &Tensor,
    alpha: Scalar,
    x: &Tensor,
    beta: Scalar,
    y: &Tensor,
) -> Result<(), Error> {
    require_same_datatype(&[dest, x, y])?;
    check_broadcast_binary(dest, x, y)?;
    check_elementwise_alias(dest, x)?;
    check_elementwise_alias(dest, y)?;
    dest.stream().binary(
        op,
        dest.buffer().as_ref(),
        dest.dims(),
        alpha,
        x.buffer().as_ref(),
        x.dims(),
        beta,
        y.buffer().as_ref(),
        y.dims(),
    )
}

/// Dispatches the ternary `select` operation:
/// `dest = (alpha * x) >= 0 ? (beta * y) : (gamma * z)`.
///
/// # Errors
///
/// Returns [`Error::Shape`] if any operand is not commensurate with `dest`,
/// [`Error::Alias`] on an unsafe overlap, or [`Error::Device`] on backend
/// failure.
#[allow(clippy::too_many_arguments)]
pub fn ternary_select(
    dest: &Tensor,
    alpha: Scalar,
    x: &Tensor,
    beta: Scalar,
    y: &Tensor,
    gamma: Scalar,
    z: &Tensor,
) -> Result<(), Error> {
    require_same_datatype(&[dest, y, z])?;
    for operand in [x, y, z] {
        check_commensurate_pair(dest, operand)?;
        check_elementwise_alias(dest, operand)?;
    }
    dest.stream().ternary_select(
        dest.buffer().as_ref(),
        dest.dims(),
        alpha,
        x.buffer().as_ref(),
        x.dims(),
        beta,
        y.buffer().as_ref(),
        y.dims(),
        gamma,
        z.buffer().as_ref(),
        z.dims(),
    )
}

/// Dispatches a reduction along `input`'s last axis. `dest`'s shape must
/// equal `input`'s shape with the last axis removed.
///
/// # Errors
///
/// Returns [`Error::Shape`] on a shape/datatype mismatch or
/// [`Error::Device`] on backend failure.
pub fn reduction(op: ReductionOp, dest: &Tensor, alpha: Scalar, input: &Tensor) -> Result<(), Error> {
    require_same_datatype(&[dest, input])?;
    let input_shape = input.dims().shape();
    let expected = if input_shape.is_empty() {
        &input_shape[..]
    } else {
        &input_shape[..input_shape.len() - 1]
    };
    if dest.dims().shape() != expected {
        return Err(Error::Shape(format!(
            "reduction destination shape {:?} must drop the last axis of {:?}",
            dest.dims().shape(),
            input_shape
        )));
    }
    dest.stream().reduction(
        op,
        dest.buffer().as_ref(),
        dest.dims(),
        alpha,
        input.buffer().as_ref(),
        input.dims(),
    )
}

/// Dispatches `C = alpha * opA(A) * opB(B) + beta * C`, canonicalizing A and
/// B so the backend only ever sees access-increasing operands (§4.6, the
/// "single non-obvious algorithm").
///
/// # Errors
///
/// Returns [`Error::Shape`] if any operand has no contiguous axis, or the
/// resulting matrix dimensions are inconsistent; [`Error::Alias`] if `C`
/// overlaps `A` or `B`; or [`Error::Device`] on backend failure.
pub fn gemm(
    dest: &Tensor,
    trans_a: bool,
    trans_b: bool,
    alpha: Scalar,
    a: &Tensor,
    b: &Tensor,
    beta: Scalar,
) -> Result<(), Error> {
    require_same_datatype(&[dest, a, b])?;

    if driver_mod::partial_aliases(dest.buffer().as_ref(), a.buffer().as_ref()) {
        return Err(Error::Alias("gemm destination aliases operand A".into()));
    }
    if driver_mod::partial_aliases(dest.buffer().as_ref(), b.buffer().as_ref()) {
        return Err(Error::Alias("gemm destination aliases operand B".into()));
    }

    let (phys_trans_c, column_stride_c) = dest.dims().canonical_matrix()?;
    if phys_trans_c {
        return Err(Error::Shape(
            "gemm destination must be access-increasing".into(),
        ));
    }

    let (phys_trans_a, column_stride_a) = a.dims().canonical_matrix()?;
    let (phys_trans_b, column_stride_b) = b.dims().canonical_matrix()?;
    let eff_trans_a = trans_a ^ phys_trans_a;
    let eff_trans_b = trans_b ^ phys_trans_b;

    let [a0, a1] = [a.dims().shape()[0], a.dims().shape()[1]];
    let [b0, b1] = [b.dims().shape()[0], b.dims().shape()[1]];
    let (rows_op_a, cols_op_a) = if trans_a { (a1, a0) } else { (a0, a1) };
    let (rows_op_b, cols_op_b) = if trans_b { (b1, b0) } else { (b0, b1) };

    let [dest_rows, dest_cols] = [dest.dims().shape()[0], dest.dims().shape()[1]];
    if cols_op_a != rows_op_b || rows_op_a != dest_rows || cols_op_b != dest_cols {
        return Err(Error::Shape(format!(
            "gemm shape mismatch: opA(A) is {rows_op_a}x{cols_op_a}, opB(B) is {rows_op_b}x{cols_op_b}, C is {dest_rows}x{dest_cols}"
        )));
    }

    dest.stream().gemm(
        dest.buffer().as_ref(),
        dest.dims().offset(),
        column_stride_c,
        eff_trans_a,
        eff_trans_b,
        alpha,
        a.buffer().as_ref(),
        a.dims().offset(),
        rows_op_a,
        cols_op_a,
        column_stride_a,
        b.buffer().as_ref(),
        b.dims().offset(),
        cols_op_b,
        column_stride_b,
        beta,
    )
}

/// Dispatches the `rand` op: `dest = samples(distribution)`. `f32` only.
///
/// # Errors
///
/// Returns [`Error::Shape`] if `dest`'s datatype is not `f32`, or
/// [`Error::Device`] on backend failure.
pub fn rand(dest: &Tensor, distribution: Distribution, seed: Option<u64>) -> Result<(), Error> {
    if dest.datatype() != DataType::F32 {
        return Err(Error::Shape(format!(
            "rand requires an f32 destination, got {}",
            dest.datatype()
        )));
    }
    dest.stream()
        .rand(dest.buffer().as_ref(), dest.dims(), distribution, seed)
}

/// Iterates `dims.shape()` in row-major order, yielding the pair of
/// `(dest_index, operand_index)` linear indices produced by broadcasting
/// `operand_dims` against `dest_dims` per §4.3's modular-indexing rule.
/// Shared by backend elementwise kernels (unary/binary/select).
pub(crate) fn broadcast_pairs<'a>(
    dest_dims: &'a Dimensions,
    operand_dims: &'a Dimensions,
) -> impl Iterator<Item = (usize, usize)> + 'a {
    dest_dims.coordinates().map(move |coord| {
        let dest_index = dest_dims.linear_index(&coord);
        let operand_coord: Vec<usize> = coord
            .iter()
            .zip(operand_dims.shape())
            .map(|(&c, &extent)| c % extent)
            .collect();
        let operand_index = operand_dims.linear_index(&operand_coord);
        (dest_index, operand_index)
    })
}
