//! Fixed-capacity byte stream writer.
//!
//! The writer appends little-endian values to a caller-supplied buffer and
//! can later overwrite bytes it already produced (length fields, address
//! placeholders) without moving its cursor. It never reallocates: the buffer
//! is sized up front and running out of room is reported as
//! [`UnwindError::BufferOverflow`].

use super::error::{UnwindError, UnwindResult};
use super::leb128::{emit_sleb128, emit_uleb128, MAX_LEB128_LEN};

/// Fixed-width values that can be written in little-endian order.
pub trait LeBytes: Copy {
    const SIZE: usize;

    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {
        $(
            impl LeBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_bytes!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Append-only writer over a borrowed buffer with positional write-back.
#[derive(Debug)]
pub struct ByteWriter<'buf> {
    buffer: &'buf mut [u8],
    count: usize,
}

impl<'buf> ByteWriter<'buf> {
    /// Create a writer; the capacity is the length of `buffer`.
    pub fn new(buffer: &'buf mut [u8]) -> Self {
        Self { buffer, count: 0 }
    }

    /// Current cursor position, i.e. the number of bytes written.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buffer[..self.count]
    }

    /// Give up the writer and keep the written prefix of the buffer.
    pub fn into_written(self) -> &'buf [u8] {
        let buffer: &'buf [u8] = self.buffer;
        &buffer[..self.count]
    }

    /// Reserve `len` bytes at the cursor and advance past them.
    fn reserve(&mut self, len: usize) -> UnwindResult<&mut [u8]> {
        let start = self.count;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(UnwindError::BufferOverflow {
                needed: start.saturating_add(len),
                capacity: self.buffer.len(),
            })?;
        self.count = end;
        Ok(&mut self.buffer[start..end])
    }

    /// Append a fixed-width value.
    pub fn write<T: LeBytes>(&mut self, value: T) -> UnwindResult<()> {
        value.write_le(self.reserve(T::SIZE)?);
        Ok(())
    }

    /// Overwrite previously written bytes at `position`; the cursor stays put.
    pub fn write_at<T: LeBytes>(&mut self, position: usize, value: T) -> UnwindResult<()> {
        let end = position
            .checked_add(T::SIZE)
            .filter(|&end| end <= self.count)
            .ok_or(UnwindError::InvalidWriteBack {
                position,
                len: T::SIZE,
                count: self.count,
            })?;
        value.write_le(&mut self.buffer[position..end]);
        Ok(())
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> UnwindResult<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_uleb128(&mut self, value: u64) -> UnwindResult<()> {
        let mut scratch = [0u8; MAX_LEB128_LEN];
        let len = MAX_LEB128_LEN - emit_uleb128(&mut scratch, value).len();
        self.write_bytes(&scratch[..len])
    }

    pub fn write_sleb128(&mut self, value: i64) -> UnwindResult<()> {
        let mut scratch = [0u8; MAX_LEB128_LEN];
        let len = MAX_LEB128_LEN - emit_sleb128(&mut scratch, value).len();
        self.write_bytes(&scratch[..len])
    }
}
