use std::fmt::{self, Display, Formatter};
use std::io;
use std::mem;

use bytemuck::Pod;
use num_traits::ToPrimitive;
use thiserror::Error;

pub type Bytes = Vec<u8>;

/// The element type of a decoded array payload.
///
/// Scalar variants map one-to-one onto fixed-width machine types. The
/// remaining variants cover the two packed pixel layouts the instrument
/// formats use, which need structured views rather than a flat numeric type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// One byte per value, zero = false
    Boolean,
    /// Interleaved (re, im) `f32` pairs
    Complex64,
    /// Interleaved (re, im) `f64` pairs
    Complex128,
    /// Half-plane packed complex `f32` values (FFT output layout)
    PackedComplexF32,
    /// Packed 4-byte RGB(A) pixels
    RGB,
    #[default]
    Unknown,
}

impl ElementType {
    /// Get the size in bytes of a single element of this type
    pub const fn size_of(&self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Boolean | Self::Unknown => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 | Self::PackedComplexF32 | Self::RGB => 4,
            Self::I64 | Self::U64 | Self::F64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
        }
    }

    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::Complex64 | Self::Complex128 | Self::PackedComplexF32)
    }

    /// Whether the type is a plain real scalar convertible to `f64`
    pub const fn is_real_scalar(&self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
                | Self::F32
                | Self::F64
                | Self::Boolean
        )
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArrayRetrievalError {
    #[error("The requested view does not match the number of bytes available in the buffer")]
    DataTypeSizeMismatch,
    #[error("Element type {0} does not support this view")]
    UnsupportedType(ElementType),
}

impl From<bytemuck::PodCastError> for ArrayRetrievalError {
    fn from(_: bytemuck::PodCastError) -> Self {
        Self::DataTypeSizeMismatch
    }
}

impl From<ArrayRetrievalError> for io::Error {
    fn from(value: ArrayRetrievalError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

fn collect_as_f64<T: Pod + ToPrimitive>(data: &[u8]) -> Vec<f64> {
    let values: Vec<T> = bytemuck::pod_collect_to_vec(data);
    values
        .into_iter()
        .map(|v| v.to_f64().unwrap_or(f64::NAN))
        .collect()
}

/// A raw little-endian byte buffer paired with the element type of its
/// contents, providing typed views over the bytes.
///
/// Payload bytes come out of the file exactly as stored; views copy into
/// properly aligned buffers on access rather than borrowing, since the
/// backing buffer carries no alignment guarantee.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataArray {
    pub data: Bytes,
    pub dtype: ElementType,
}

impl DataArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(dtype: ElementType, data: Bytes) -> Self {
        Self { data, dtype }
    }

    pub fn from_values<T: Pod>(dtype: ElementType, values: &[T]) -> Self {
        Self {
            data: bytemuck::cast_slice(values).to_vec(),
            dtype,
        }
    }

    /// The number of elements in the buffer
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    fn check_divisible(&self, width: usize) -> Result<(), ArrayRetrievalError> {
        if width == 0 || self.data.len() % width != 0 {
            Err(ArrayRetrievalError::DataTypeSizeMismatch)
        } else {
            Ok(())
        }
    }

    /// View the buffer as a vector of `T`, where `T` must match the
    /// element width exactly
    pub fn to_vec_of<T: Pod>(&self) -> Result<Vec<T>, ArrayRetrievalError> {
        self.check_divisible(mem::size_of::<T>())?;
        Ok(bytemuck::pod_collect_to_vec(&self.data))
    }

    /// Widen every real scalar element to `f64`. Complex and packed pixel
    /// types refuse; use the structured views for those.
    pub fn to_f64(&self) -> Result<Vec<f64>, ArrayRetrievalError> {
        self.check_divisible(self.dtype.size_of())?;
        let out = match self.dtype {
            ElementType::I8 => collect_as_f64::<i8>(&self.data),
            ElementType::U8 | ElementType::Boolean => collect_as_f64::<u8>(&self.data),
            ElementType::I16 => collect_as_f64::<i16>(&self.data),
            ElementType::U16 => collect_as_f64::<u16>(&self.data),
            ElementType::I32 => collect_as_f64::<i32>(&self.data),
            ElementType::U32 => collect_as_f64::<u32>(&self.data),
            ElementType::I64 => collect_as_f64::<i64>(&self.data),
            ElementType::U64 => collect_as_f64::<u64>(&self.data),
            ElementType::F32 => collect_as_f64::<f32>(&self.data),
            ElementType::F64 => collect_as_f64::<f64>(&self.data),
            other => return Err(ArrayRetrievalError::UnsupportedType(other)),
        };
        Ok(out)
    }

    /// View interleaved single-precision complex values as (re, im) pairs
    pub fn to_complex_f32(&self) -> Result<Vec<[f32; 2]>, ArrayRetrievalError> {
        match self.dtype {
            ElementType::Complex64 | ElementType::PackedComplexF32 => {
                self.check_divisible(8)?;
                Ok(bytemuck::pod_collect_to_vec(&self.data))
            }
            other => Err(ArrayRetrievalError::UnsupportedType(other)),
        }
    }

    /// View interleaved double-precision complex values as (re, im) pairs
    pub fn to_complex_f64(&self) -> Result<Vec<[f64; 2]>, ArrayRetrievalError> {
        match self.dtype {
            ElementType::Complex128 => {
                self.check_divisible(16)?;
                Ok(bytemuck::pod_collect_to_vec(&self.data))
            }
            other => Err(ArrayRetrievalError::UnsupportedType(other)),
        }
    }

    /// View packed RGB(A) pixels as 4-byte groups
    pub fn to_rgb(&self) -> Result<Vec<[u8; 4]>, ArrayRetrievalError> {
        match self.dtype {
            ElementType::RGB => {
                self.check_divisible(4)?;
                Ok(bytemuck::pod_collect_to_vec(&self.data))
            }
            other => Err(ArrayRetrievalError::UnsupportedType(other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::I16.size_of(), 2);
        assert_eq!(ElementType::Complex128.size_of(), 16);
        assert_eq!(ElementType::RGB.size_of(), 4);
        assert!(ElementType::PackedComplexF32.is_complex());
        assert!(!ElementType::RGB.is_real_scalar());
    }

    #[test]
    fn test_to_f64_widens() -> Result<(), ArrayRetrievalError> {
        let da = DataArray::from_values(ElementType::I16, &[-3i16, 0, 12]);
        assert_eq!(da.len(), 3);
        assert_eq!(da.to_f64()?, vec![-3.0, 0.0, 12.0]);

        let da = DataArray::from_values(ElementType::F32, &[1.5f32, 2.5]);
        assert_eq!(da.to_f64()?, vec![1.5, 2.5]);
        Ok(())
    }

    #[test]
    fn test_complex_view() -> Result<(), ArrayRetrievalError> {
        let da = DataArray::from_values(ElementType::Complex64, &[1.0f32, -1.0, 0.5, 0.25]);
        assert_eq!(da.len(), 2);
        assert_eq!(da.to_complex_f32()?, vec![[1.0, -1.0], [0.5, 0.25]]);
        assert!(da.to_f64().is_err());
        Ok(())
    }

    #[test]
    fn test_rgb_view() -> Result<(), ArrayRetrievalError> {
        let da = DataArray::wrap(ElementType::RGB, vec![10, 20, 30, 255, 1, 2, 3, 255]);
        assert_eq!(da.len(), 2);
        assert_eq!(da.to_rgb()?, vec![[10, 20, 30, 255], [1, 2, 3, 255]]);
        Ok(())
    }

    #[test]
    fn test_size_mismatch() {
        let da = DataArray::wrap(ElementType::I32, vec![0u8; 6]);
        assert_eq!(da.to_f64(), Err(ArrayRetrievalError::DataTypeSizeMismatch));
    }
}
