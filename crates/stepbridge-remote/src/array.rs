//! Flat numeric arrays carried as raw little-endian bytes.
//!
//! The envelope names the element type (`A_dtype`, numpy spelling) and the
//! shape (`A_shape`); the bytes travel in their own frame right after it.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ---------------------------------------------------------------------------
// ArrayError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    #[error("Unknown dtype: {0:?}")]
    UnknownDType(String),

    #[error("Shape {shape:?} holds {expected} elements, got {got}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("Expected {expected} bytes for the declared dtype and shape, got {got}")]
    ByteLength { expected: usize, got: usize },

    #[error("Array holds {actual}, requested {requested}")]
    DTypeMismatch { requested: DType, actual: DType },

    #[error("Expected a single element, got shape {0:?}")]
    NotScalar(Vec<usize>),

    #[error("Expected at most one dimension, got shape {0:?}")]
    TooManyDims(Vec<usize>),

    #[error("Shape {0:?} is too large to address")]
    ShapeOverflow(Vec<usize>),
}

// ---------------------------------------------------------------------------
// DType
// ---------------------------------------------------------------------------

/// Element type of an [`ArrayPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Uint64,
    Uint8,
}

impl DType {
    /// Bytes per element.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Float64 | Self::Int64 | Self::Uint64 => 8,
            Self::Float32 | Self::Int32 => 4,
            Self::Uint8 => 1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Uint64 => "uint64",
            Self::Uint8 => "uint8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float64" => Ok(Self::Float64),
            "float32" => Ok(Self::Float32),
            "int64" => Ok(Self::Int64),
            "int32" => Ok(Self::Int32),
            "uint64" => Ok(Self::Uint64),
            "uint8" => Ok(Self::Uint8),
            other => Err(ArrayError::UnknownDType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that map onto a [`DType`].
pub trait Element: sealed::Sealed + Copy {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `DTYPE.size()` long.
    fn read_le(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }

                #[allow(
                    clippy::cast_precision_loss,
                    clippy::cast_lossless,
                    clippy::unnecessary_cast
                )]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element!(
    f64 => Float64,
    f32 => Float32,
    i64 => Int64,
    i32 => Int32,
    u64 => Uint64,
    u8 => Uint8,
);

// ---------------------------------------------------------------------------
// ArrayPayload
// ---------------------------------------------------------------------------

/// A shaped numeric array in wire form.
///
/// # Example
///
/// ```
/// use stepbridge_remote::array::{ArrayPayload, DType};
///
/// let a = ArrayPayload::from_slice(&[1.0_f32, 2.0, 3.0, 4.0]);
/// assert_eq!(a.dtype(), DType::Float32);
/// assert_eq!(a.shape(), &[4]);
/// assert_eq!(a.as_bytes().len(), 16);
/// assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayPayload {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl ArrayPayload {
    /// One-dimensional array of shape `[values.len()]`.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: vec![values.len()],
            data: encode(values),
        }
    }

    /// Array with an explicit shape; the element count must match.
    pub fn with_shape<T: Element>(values: &[T], shape: Vec<usize>) -> Result<Self, ArrayError> {
        let expected =
            element_count(&shape).ok_or_else(|| ArrayError::ShapeOverflow(shape.clone()))?;
        if expected != values.len() {
            return Err(ArrayError::ShapeMismatch {
                shape,
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: encode(values),
        })
    }

    /// Zero-dimensional array (shape `[]`).
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            data: encode(&[value]),
        }
    }

    /// Number of bytes an array of `dtype` and `shape` occupies.
    pub fn byte_len(dtype: DType, shape: &[usize]) -> Result<usize, ArrayError> {
        element_count(shape)
            .and_then(|n| n.checked_mul(dtype.size()))
            .ok_or_else(|| ArrayError::ShapeOverflow(shape.to_vec()))
    }

    /// Rebuild from received metadata and bytes.
    pub fn from_bytes(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, ArrayError> {
        let expected = Self::byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(ArrayError::ByteLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode as `T`; the stored dtype must be exactly `T::DTYPE`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        if self.dtype != T::DTYPE {
            return Err(ArrayError::DTypeMismatch {
                requested: T::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size())
            .map(T::read_le)
            .collect())
    }

    /// Decode any dtype, widening to `f64`.
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn widen<T: Element>(data: &[u8]) -> Vec<f64> {
            data.chunks_exact(T::DTYPE.size())
                .map(|chunk| T::read_le(chunk).to_f64())
                .collect()
        }
        match self.dtype {
            DType::Float64 => widen::<f64>(&self.data),
            DType::Float32 => widen::<f32>(&self.data),
            DType::Int64 => widen::<i64>(&self.data),
            DType::Int32 => widen::<i32>(&self.data),
            DType::Uint64 => widen::<u64>(&self.data),
            DType::Uint8 => widen::<u8>(&self.data),
        }
    }

    /// The single element of a scalar or one-element array, as `T`.
    pub fn to_scalar<T: Element>(&self) -> Result<T, ArrayError> {
        if self.len() != 1 {
            return Err(ArrayError::NotScalar(self.shape.clone()));
        }
        let values = self.to_vec::<T>()?;
        values
            .first()
            .copied()
            .ok_or_else(|| ArrayError::NotScalar(self.shape.clone()))
    }
}

fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1_usize, |n, &dim| n.checked_mul(dim))
}

fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * T::DTYPE.size());
    for v in values {
        v.write_le(&mut data);
    }
    data
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
