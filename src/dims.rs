//! Dimensions (C3): the shape/strides/offset descriptor bound to every
//! tensor view, and the reshape/transpose/select/broadcast math over it.

use crate::error::Error;

/// A shape + strides + offset descriptor over an element-typed buffer.
///
/// `shape` is an ordered sequence of positive element counts, leftmost
/// slowest-varying. `strides` are in elements, not bytes. `offset` is the
/// element offset into the backing buffer. For a multi-index `I`, the
/// linear index into the buffer is `offset + Σ Iᵢ·stridesᵢ`; no stride
/// pattern may cause two distinct in-range indices to collide except
/// through a size-1 broadcast axis (the aliasing invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimensions {
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

/// A per-axis selector for [`Dimensions::select`].
#[derive(Debug, Clone)]
pub enum Selector {
    /// Drops the axis, folding the chosen coordinate into the offset.
    Index(usize),
    /// Keeps the axis, restricted to the contiguous range `[lo, hi)`.
    Range(core::ops::Range<usize>),
    /// Keeps the axis unchanged.
    All,
}

impl Dimensions {
    /// Builds a dense row-major descriptor for `shape`, offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if any entry of `shape` is zero.
    pub fn new(shape: &[usize]) -> Result<Dimensions, Error> {
        if shape.iter().any(|&d| d == 0) {
            return Err(Error::Shape(format!(
                "shape entries must be positive, got {shape:?}"
            )));
        }
        Ok(Dimensions {
            strides: Self::row_major_strides(shape),
            shape: shape.to_vec(),
            offset: 0,
        })
    }

    /// Builds a descriptor from explicit parts, without validation beyond
    /// the positivity of `shape`. Intended for backends and views that have
    /// already derived `strides`/`offset` correctly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `shape` and `strides` differ in length,
    /// or if any entry of `shape` is zero.
    pub fn from_parts(shape: Vec<usize>, strides: Vec<usize>, offset: usize) -> Result<Dimensions, Error> {
        if shape.len() != strides.len() {
            return Err(Error::Shape(format!(
                "shape (rank {}) and strides (rank {}) must match",
                shape.len(),
                strides.len()
            )));
        }
        if shape.iter().any(|&d| d == 0) {
            return Err(Error::Shape(format!(
                "shape entries must be positive, got {shape:?}"
            )));
        }
        Ok(Dimensions { shape, strides, offset })
    }

    fn row_major_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1_usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of axes.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The shape, leftmost axis slowest-varying.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The strides, in elements.
    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The element offset into the backing buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total element count, `∏ shape`.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// The largest linear index this descriptor can produce, used by
    /// callers to bound-check against a buffer's length.
    #[must_use]
    pub fn max_linear_index(&self) -> usize {
        let span: usize = self
            .shape
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        self.offset + span
    }

    /// Whether `strides` equal the natural row-major strides for `shape`.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.strides == Self::row_major_strides(&self.shape)
    }

    /// Whether, after removing size-1 axes, the remaining strides are
    /// strictly decreasing (no transposed axis).
    #[must_use]
    pub fn is_access_increasing(&self) -> bool {
        let kept: Vec<usize> = self
            .shape
            .iter()
            .zip(&self.strides)
            .filter(|(&d, _)| d != 1)
            .map(|(_, &s)| s)
            .collect();
        kept.windows(2).all(|w| w[0] > w[1])
    }

    /// Dense ∧ access-increasing ∧ `offset == 0`.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.offset == 0 && self.is_dense() && self.is_access_increasing()
    }

    /// Linear index of multi-index `coord`.
    ///
    /// # Panics
    ///
    /// Panics if `coord.len() != self.rank()`.
    #[must_use]
    pub fn linear_index(&self, coord: &[usize]) -> usize {
        assert_eq!(coord.len(), self.rank());
        self.offset
            + coord
                .iter()
                .zip(&self.strides)
                .map(|(&c, &s)| c * s)
                .sum::<usize>()
    }

    /// Reshapes to `new_shape`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] unless `self` is dense and access-increasing
    /// and `∏ new_shape == ∏ self.shape`.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Dimensions, Error> {
        if !self.is_dense() || !self.is_access_increasing() {
            return Err(Error::Shape(format!(
                "reshape requires dense, access-increasing dimensions; got shape {:?} strides {:?}",
                self.shape, self.strides
            )));
        }
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return Err(Error::Shape(format!(
                "reshape cannot change element count: {:?} has {} elements, {:?} has {}",
                self.shape,
                self.size(),
                new_shape,
                new_size
            )));
        }
        Dimensions::new(new_shape).map(|d| Dimensions {
            offset: self.offset,
            ..d
        })
    }

    /// Reorders axes according to permutation `perm` of `[0, rank)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `perm` is not a permutation of
    /// `[0, self.rank())`.
    pub fn transpose(&self, perm: &[usize]) -> Result<Dimensions, Error> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        if perm.len() != rank {
            return Err(Error::Shape(format!(
                "transpose permutation length {} does not match rank {rank}",
                perm.len()
            )));
        }
        for &p in perm {
            if p >= rank || seen[p] {
                return Err(Error::Shape(format!(
                    "{perm:?} is not a permutation of 0..{rank}"
                )));
            }
            seen[p] = true;
        }
        let shape = perm.iter().map(|&p| self.shape[p]).collect();
        let strides = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(Dimensions {
            shape,
            strides,
            offset: self.offset,
        })
    }

    /// Applies one [`Selector`] per axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Select`] if `selectors.len() != self.rank()`, if an
    /// `Index` selector is out of bounds, or if a `Range` selector is empty,
    /// out of bounds, or non-increasing (`lo >= hi`).
    pub fn select(&self, selectors: &[Selector]) -> Result<Dimensions, Error> {
        if selectors.len() != self.rank() {
            return Err(Error::Select(format!(
                "expected {} selectors, got {}",
                self.rank(),
                selectors.len()
            )));
        }
        let mut shape = Vec::new();
        let mut strides = Vec::new();
        let mut offset = self.offset;
        for (axis, selector) in selectors.iter().enumerate() {
            let extent = self.shape[axis];
            let stride = self.strides[axis];
            match selector {
                Selector::Index(idx) => {
                    if *idx >= extent {
                        return Err(Error::Select(format!(
                            "index {idx} out of bounds for axis {axis} of size {extent}"
                        )));
                    }
                    offset += idx * stride;
                }
                Selector::Range(range) => {
                    if range.start >= range.end || range.end > extent {
                        return Err(Error::Select(format!(
                            "range {range:?} invalid for axis {axis} of size {extent}"
                        )));
                    }
                    offset += range.start * stride;
                    shape.push(range.end - range.start);
                    strides.push(stride);
                }
                Selector::All => {
                    shape.push(extent);
                    strides.push(stride);
                }
            }
        }
        if shape.is_empty() {
            // every axis was an `Index` selector: the result is a 0-D scalar view,
            // represented here as a single-element axis so buffers stay non-empty.
            shape.push(1);
            strides.push(1);
        }
        Ok(Dimensions { shape, strides, offset })
    }

    /// `[product_of_leading_axes, last_axis]`.
    #[must_use]
    pub fn as_2d_shape(&self) -> [usize; 2] {
        match self.shape.split_last() {
            Some((&last, leading)) => [leading.iter().product(), last],
            None => [1, 1],
        }
    }

    /// `[first_axis, product_of_trailing_axes]`.
    #[must_use]
    pub fn as_batch_shape(&self) -> [usize; 2] {
        match self.shape.split_first() {
            Some((&first, trailing)) => [first, trailing.iter().product()],
            None => [1, 1],
        }
    }

    /// For a 2-D descriptor, the stride of the slower-varying axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `self.rank() != 2`.
    pub fn column_stride(&self) -> Result<usize, Error> {
        if self.rank() != 2 {
            return Err(Error::Shape(format!(
                "column_stride requires rank 2, got rank {}",
                self.rank()
            )));
        }
        Ok(self.strides[0])
    }

    /// The stride of the fastest-varying axis; must be 1 for gemm operands.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `self.rank() == 0`.
    pub fn element_stride(&self) -> Result<usize, Error> {
        self.strides
            .last()
            .copied()
            .ok_or_else(|| Error::Shape("element_stride requires rank >= 1".into()))
    }

    /// Canonicalizes a rank-2 descriptor into a `(physically_transposed,
    /// leading_dimension)` pair for gemm dispatch (§4.6). A descriptor is
    /// canonical when one axis has stride 1; if it is the trailing axis,
    /// the descriptor is already access-increasing (`physically_transposed
    /// = false`) and the leading dimension is the other axis's stride. If
    /// it is the leading axis instead, the descriptor is an "in-place
    /// transposed" view (`physically_transposed = true`) and the leading
    /// dimension is the trailing axis's stride.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if `self.rank() != 2` or neither axis has
    /// stride 1 (`element_stride != 1` in either orientation).
    pub fn canonical_matrix(&self) -> Result<(bool, usize), Error> {
        if self.rank() != 2 {
            return Err(Error::Shape(format!(
                "gemm operand must be rank 2, got rank {}",
                self.rank()
            )));
        }
        let [s0, s1] = [self.strides[0], self.strides[1]];
        if s1 == 1 {
            Ok((false, s0))
        } else if s0 == 1 {
            Ok((true, s1))
        } else {
            Err(Error::Shape(format!(
                "gemm operand has no contiguous axis: strides {:?}",
                self.strides
            )))
        }
    }

    /// Iterates every multi-index of `self.shape()` in row-major order.
    pub fn coordinates(&self) -> CoordIter<'_> {
        CoordIter {
            shape: &self.shape,
            next: if self.shape.iter().all(|&d| d > 0) {
                Some(vec![0; self.shape.len()])
            } else {
                None
            },
        }
    }
}

/// Iterator over row-major multi-indices of a fixed shape, produced by
/// [`Dimensions::coordinates`].
pub struct CoordIter<'a> {
    shape: &'a [usize],
    next: Option<Vec<usize>>,
}

impl Iterator for CoordIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut advance = current.clone();
        for axis in (0..self.shape.len()).rev() {
            advance[axis] += 1;
            if advance[axis] < self.shape[axis] {
                self.next = Some(advance);
                return Some(current);
            }
            advance[axis] = 0;
        }
        // every axis rolled over: this was the last coordinate
        self.next = None;
        Some(current)
    }
}

/// Two per-axis extents `a` and `b` are *commensurate* iff, for every axis,
/// `max(aᵢ, bᵢ) mod min(aᵢ, bᵢ) == 0`. This is the broadcasting policy used
/// throughout C6: a deliberate relaxation of NumPy's length-1-only rule to
/// any exact divisor (§4.3, §9 "Broadcasting relaxation").
#[must_use]
pub fn commensurate(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(&x, &y)| {
            let (hi, lo) = if x >= y { (x, y) } else { (y, x) };
            lo > 0 && hi % lo == 0
        })
}

/// The per-axis destination shape for two commensurate shapes: the
/// elementwise maximum. Callers must check [`commensurate`] first.
#[must_use]
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter().zip(b).map(|(&x, &y)| x.max(y)).collect()
}
