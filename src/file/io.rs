//! Endian-aware primitive reading and writing.
//!
//! [`CilIO`] abstracts over the fixed-size primitives that appear in module images,
//! `.resources` containers and BAML streams. The free functions perform bounds-checked
//! reads and writes at a caller-maintained offset; [`crate::file::parser::Parser`] and
//! [`crate::file::writer::Writer`] build on top of them.

use crate::Result;

/// Trait for primitive types that can be decoded from and encoded to raw bytes.
pub trait CilIO: Sized {
    /// The fixed-size byte array representation of the type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),*) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Reads a value of type `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Writes `value` at `offset` into an existing buffer and advances the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the write would exceed `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}
