//! Datatype registry (C2): the enumerated element types tensors and buffers
//! are tagged with, plus the typed scalar value and typed-copy surface used
//! to move data across the host/device boundary.

use crate::error::Error;

/// One of the ten element types a buffer or tensor may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DataType {
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// 32-bit IEEE-754 float.
    F32,
    /// 64-bit IEEE-754 float.
    F64,
}

impl DataType {
    /// All ten variants, in declaration order.
    pub const ALL: [DataType; 10] = [
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::U8,
        DataType::U16,
        DataType::U32,
        DataType::U64,
        DataType::F32,
        DataType::F64,
    ];

    /// Size of one element, in bytes.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    /// Whether this is one of the eight integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Whether this is `f32` or `f64`.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// The zero value of this datatype, as a [`Scalar`].
    #[must_use]
    pub const fn zero(self) -> Scalar {
        match self {
            DataType::I8 => Scalar::I8(0),
            DataType::I16 => Scalar::I16(0),
            DataType::I32 => Scalar::I32(0),
            DataType::I64 => Scalar::I64(0),
            DataType::U8 => Scalar::U8(0),
            DataType::U16 => Scalar::U16(0),
            DataType::U32 => Scalar::U32(0),
            DataType::U64 => Scalar::U64(0),
            DataType::F32 => Scalar::F32(0.0),
            DataType::F64 => Scalar::F64(0.0),
        }
    }

    /// Integer domain `[min, max]` expressed in `i128` so that `u64`'s full
    /// range is representable. Returns `None` for float datatypes.
    #[must_use]
    pub const fn integer_domain(self) -> Option<(i128, i128)> {
        match self {
            DataType::I8 => Some((i8::MIN as i128, i8::MAX as i128)),
            DataType::I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            DataType::I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            DataType::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            DataType::U8 => Some((0, u8::MAX as i128)),
            DataType::U16 => Some((0, u16::MAX as i128)),
            DataType::U32 => Some((0, u32::MAX as i128)),
            DataType::U64 => Some((0, u64::MAX as i128)),
            DataType::F32 | DataType::F64 => None,
        }
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A single typed value, tagged with its [`DataType`].
///
/// This is the currency C2's typed-access surface moves across: host buffer
/// reads/writes, numeric-boundary ingress/egress, and the scalar scale
/// factors (`α`, `β`, `γ`) passed to math dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum Scalar {
    /// An `i8` value.
    I8(i8),
    /// An `i16` value.
    I16(i16),
    /// An `i32` value.
    I32(i32),
    /// An `i64` value.
    I64(i64),
    /// A `u8` value.
    U8(u8),
    /// A `u16` value.
    U16(u16),
    /// A `u32` value.
    U32(u32),
    /// A `u64` value.
    U64(u64),
    /// An `f32` value.
    F32(f32),
    /// An `f64` value.
    F64(f64),
}

macro_rules! scalar_dispatch {
    ($self:expr, $ident:ident => $body:expr) => {
        match $self {
            Scalar::I8($ident) => $body,
            Scalar::I16($ident) => $body,
            Scalar::I32($ident) => $body,
            Scalar::I64($ident) => $body,
            Scalar::U8($ident) => $body,
            Scalar::U16($ident) => $body,
            Scalar::U32($ident) => $body,
            Scalar::U64($ident) => $body,
            Scalar::F32($ident) => $body,
            Scalar::F64($ident) => $body,
        }
    };
}

impl Scalar {
    /// The datatype this value is tagged with.
    #[must_use]
    pub fn datatype(self) -> DataType {
        match self {
            Scalar::I8(_) => DataType::I8,
            Scalar::I16(_) => DataType::I16,
            Scalar::I32(_) => DataType::I32,
            Scalar::I64(_) => DataType::I64,
            Scalar::U8(_) => DataType::U8,
            Scalar::U16(_) => DataType::U16,
            Scalar::U32(_) => DataType::U32,
            Scalar::U64(_) => DataType::U64,
            Scalar::F32(_) => DataType::F32,
            Scalar::F64(_) => DataType::F64,
        }
    }

    /// Canonical 64-bit float form. Exact for integers up to 2^53; lossy
    /// beyond that, matching the crate's numeric-boundary semantics (§4.2).
    #[must_use]
    pub fn to_f64(self) -> f64 {
        scalar_dispatch!(self, v => v as f64)
    }

    /// Canonical 128-bit integer form, truncating toward zero if this value
    /// is a float. `i128` is wide enough to hold every integer datatype
    /// exactly, including the full `u64` range.
    #[must_use]
    pub fn to_i128_truncated(self) -> i128 {
        match self {
            Scalar::F32(v) => v.trunc() as i128,
            Scalar::F64(v) => v.trunc() as i128,
            other => scalar_dispatch!(other, v => v as i128),
        }
    }

    /// Converts this value to `dst`, following the datatype registry's
    /// narrowing rules: float-to-integer and integer-to-integer narrowing
    /// rounds toward zero and wraps modulo `2^width` when `unchecked` is
    /// `true`; when `unchecked` is `false`, an out-of-range result fails
    /// with [`Error::Domain`] instead of wrapping. Widening and
    /// float-to-float conversions never fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if `unchecked` is `false` and the
    /// converted value does not fit in `dst`.
    pub fn cast(self, dst: DataType, unchecked: bool) -> Result<Scalar, Error> {
        if let Some((min, max)) = dst.integer_domain() {
            let truncated = self.to_i128_truncated();
            if !unchecked && !(min..=max).contains(&truncated) {
                return Err(Error::Domain(format!(
                    "value {truncated} out of range for {dst} (expected {min}..={max})"
                )));
            }
            Ok(Scalar::from_i128_wrapping(truncated, dst))
        } else {
            let value = self.to_f64();
            Ok(match dst {
                DataType::F32 => Scalar::F32(value as f32),
                DataType::F64 => Scalar::F64(value),
                _ => unreachable!("integer_domain() is None only for float datatypes"),
            })
        }
    }

    /// Builds a `dst`-typed scalar from a canonical integer, wrapping modulo
    /// `2^width` the way Rust's `as` casts between integer types do.
    #[must_use]
    pub fn from_i128_wrapping(value: i128, dst: DataType) -> Scalar {
        match dst {
            DataType::I8 => Scalar::I8(value as i8),
            DataType::I16 => Scalar::I16(value as i16),
            DataType::I32 => Scalar::I32(value as i32),
            DataType::I64 => Scalar::I64(value as i64),
            DataType::U8 => Scalar::U8(value as u8),
            DataType::U16 => Scalar::U16(value as u16),
            DataType::U32 => Scalar::U32(value as u32),
            DataType::U64 => Scalar::U64(value as u64),
            DataType::F32 => Scalar::F32(value as f32),
            DataType::F64 => Scalar::F64(value as f64),
        }
    }

    /// Reads the raw little-endian bytes of this value into `dst`, which
    /// must be exactly [`DataType::byte_width`] long.
    ///
    /// # Panics
    ///
    /// Panics if `dst.len() != self.datatype().byte_width()`.
    pub fn write_le_bytes(self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.datatype().byte_width());
        match self {
            Scalar::I8(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::I16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::I32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::I64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::U8(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::U16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::U32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::U64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::F32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Scalar::F64(v) => dst.copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Reads a `src`-typed value out of `bytes`, which must be exactly
    /// [`DataType::byte_width`] long.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len() != src.byte_width()`.
    #[must_use]
    pub fn read_le_bytes(bytes: &[u8], src: DataType) -> Scalar {
        assert_eq!(bytes.len(), src.byte_width());
        match src {
            DataType::I8 => Scalar::I8(i8::from_le_bytes(bytes.try_into().unwrap())),
            DataType::I16 => Scalar::I16(i16::from_le_bytes(bytes.try_into().unwrap())),
            DataType::I32 => Scalar::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
            DataType::I64 => Scalar::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
            DataType::U8 => Scalar::U8(u8::from_le_bytes(bytes.try_into().unwrap())),
            DataType::U16 => Scalar::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
            DataType::U32 => Scalar::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
            DataType::U64 => Scalar::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
            DataType::F32 => Scalar::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
            DataType::F64 => Scalar::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
        }
    }
}

/// Performs the C2 typed elementwise copy: `n` elements are read out of
/// `src` (tagged `src_dt`) starting at element offset `src_off`, converted
/// per [`Scalar::cast`], and written into `dst` (tagged `dst_dt`) starting
/// at element offset `dst_off`.
///
/// `src` and `dst` are raw byte slices over the *entire* backing buffers;
/// offsets and `n` are in elements of their respective datatypes.
///
/// # Errors
///
/// Returns [`Error::Domain`] if `unchecked` is `false` and some converted
/// element does not fit `dst_dt`.
pub fn copy(
    src_dt: DataType,
    src: &[u8],
    src_off: usize,
    dst_dt: DataType,
    dst: &mut [u8],
    dst_off: usize,
    n: usize,
    unchecked: bool,
) -> Result<(), Error> {
    let src_width = src_dt.byte_width();
    let dst_width = dst_dt.byte_width();
    for i in 0..n {
        let src_bytes = &src[(src_off + i) * src_width..(src_off + i + 1) * src_width];
        let value = Scalar::read_le_bytes(src_bytes, src_dt);
        let converted = value.cast(dst_dt, unchecked)?;
        let dst_bytes = &mut dst[(dst_off + i) * dst_width..(dst_off + i + 1) * dst_width];
        converted.write_le_bytes(dst_bytes);
    }
    Ok(())
}

/// A native Rust type that can be stored in a tensor buffer.
///
/// Implemented for the ten primitive types backing [`DataType`]'s variants.
/// This is purely a host-side convenience for converting to/from
/// [`Scalar`] and tagging ingress data with the right datatype; buffers
/// themselves are tagged with a runtime [`DataType`], not a Rust generic.
pub trait Element: bytemuck::Pod + bytemuck::Zeroable + Copy + core::fmt::Debug + 'static {
    /// The datatype this Rust type corresponds to.
    const DATATYPE: DataType;

    /// Wraps this value as a [`Scalar`].
    fn to_scalar(self) -> Scalar;

    /// Unwraps a [`Scalar`] of matching datatype back into this type.
    ///
    /// # Panics
    ///
    /// Panics if `scalar.datatype() != Self::DATATYPE`.
    fn from_scalar(scalar: Scalar) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dt:ident, $variant:ident) => {
        impl Element for $ty {
            const DATATYPE: DataType = DataType::$dt;

            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(scalar: Scalar) -> Self {
                match scalar {
                    Scalar::$variant(v) => v,
                    other => panic!(
                        "datatype mismatch: expected {}, got {}",
                        Self::DATATYPE,
                        other.datatype()
                    ),
                }
            }
        }
    };
}

impl_element!(i8, I8, I8);
impl_element!(i16, I16, I16);
impl_element!(i32, I32, I32);
impl_element!(i64, I64, I64);
impl_element!(u8, U8, U8);
impl_element!(u16, U16, U16);
impl_element!(u32, U32, U32);
impl_element!(u64, U64, U64);
impl_element!(f32, F32, F32);
impl_element!(f64, F64, F64);
