//! Fixed binary layouts for [`Binary`](super::Binary) payloads.
//!
//! A [`FixedLayout`] type always encodes to exactly [`SIZE`](FixedLayout::SIZE)
//! bytes, little-endian, with no padding. Structs and fieldless enums get an
//! implementation from `#[derive(FixedLayout)]`; primitives and arrays are
//! covered here.
//!
//! [`LAYOUT_HASH`](FixedLayout::LAYOUT_HASH) is computed at compile time from
//! the type name and the hashes of its fields. Both ends compare it during
//! the handshake to catch mismatched definitions.

use super::WireError;

pub trait FixedLayout: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Hash of the type name and field layout.
    const LAYOUT_HASH: u64;

    /// Writes `self` into the first [`SIZE`](Self::SIZE) bytes of `buf`.
    ///
    /// # Errors
    ///
    /// [`WireError::BufferTooSmall`] if `buf` is shorter than `SIZE`.
    fn write_to(&self, buf: &mut [u8]) -> Result<(), WireError>;

    /// Reads a value from the first [`SIZE`](Self::SIZE) bytes of `buf`.
    ///
    /// # Errors
    ///
    /// [`WireError::BufferTooSmall`] if `buf` is shorter than `SIZE`, or
    /// [`WireError::InvalidDiscriminant`] for an out-of-range enum or bool.
    fn read_from(buf: &[u8]) -> Result<Self, WireError>;

    /// Encodes into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`write_to`](Self::write_to).
    fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = vec![0u8; Self::SIZE];
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a, usable in constants.
#[must_use]
pub const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Order-sensitive combination of two layout hashes.
#[must_use]
pub const fn combine_layout_hash(a: u64, b: u64) -> u64 {
    a.rotate_left(15) ^ b.wrapping_mul(FNV_PRIME)
}

/// Fails unless `have >= need`.
///
/// # Errors
///
/// [`WireError::BufferTooSmall`] when the buffer is short.
#[inline]
pub const fn ensure_len(have: usize, need: usize) -> Result<(), WireError> {
    if have < need {
        Err(WireError::BufferTooSmall { need, have })
    } else {
        Ok(())
    }
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedLayout for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const LAYOUT_HASH: u64 = fnv1a(stringify!($ty).as_bytes());

                #[inline]
                fn write_to(&self, buf: &mut [u8]) -> Result<(), WireError> {
                    ensure_len(buf.len(), Self::SIZE)?;
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                    Ok(())
                }

                #[inline]
                fn read_from(buf: &[u8]) -> Result<Self, WireError> {
                    ensure_len(buf.len(), Self::SIZE)?;
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&buf[..Self::SIZE]);
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl FixedLayout for bool {
    const SIZE: usize = 1;
    const LAYOUT_HASH: u64 = fnv1a(b"bool");

    fn write_to(&self, buf: &mut [u8]) -> Result<(), WireError> {
        ensure_len(buf.len(), 1)?;
        buf[0] = u8::from(*self);
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf.len(), 1)?;
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidDiscriminant {
                name: "bool",
                value: i64::from(other),
            }),
        }
    }
}

impl<T: FixedLayout, const N: usize> FixedLayout for [T; N] {
    const SIZE: usize = T::SIZE * N;
    const LAYOUT_HASH: u64 =
        combine_layout_hash(combine_layout_hash(fnv1a(b"array"), T::LAYOUT_HASH), N as u64);

    fn write_to(&self, buf: &mut [u8]) -> Result<(), WireError> {
        ensure_len(buf.len(), Self::SIZE)?;
        for (item, chunk) in self.iter().zip(buf.chunks_exact_mut(T::SIZE.max(1))) {
            item.write_to(chunk)?;
        }
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf.len(), Self::SIZE)?;
        let items = (0..N)
            .map(|i| T::read_from(&buf[i * T::SIZE..(i + 1) * T::SIZE]))
            .collect::<Result<Vec<T>, WireError>>()?;
        items.try_into().map_err(|_| WireError::LengthOverflow)
    }
}
