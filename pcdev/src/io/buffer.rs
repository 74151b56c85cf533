//! Fixed-capacity device buffer
//!
//! Provides the clamped read/write/seek primitives every device shares.
//! The buffer never changes size after allocation; callers only ever see
//! bounded views of it.

use std::ops::Deref;

use crate::error::{Error, Result};

/// Reference point for [`DeviceBuffer::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset is absolute
    Set,
    /// Offset is relative to the current position
    Cur,
    /// Offset is relative to the end of the device
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    /// Decode the POSIX whence values 0, 1 and 2
    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(Error::InvalidOffset),
        }
    }
}

/// Result of a successful read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoOutcome {
    /// Number of bytes transferred
    pub count: usize,
    /// Offset after the transfer
    pub offset: u64,
}

/// Device memory of fixed capacity
///
/// # Example
///
/// ```
/// use pcdev::io::DeviceBuffer;
///
/// let mut buffer = DeviceBuffer::allocate(8).unwrap();
/// let written = buffer.write(6, b"hello").unwrap();
/// assert_eq!(written.count, 2);
/// assert_eq!(written.offset, 8);
///
/// let mut out = [0u8; 4];
/// let read = buffer.read(4, &mut out).unwrap();
/// assert_eq!(&out[..read.count], b"\0\0he");
/// ```
#[derive(Debug)]
pub struct DeviceBuffer(Box<[u8]>);

impl DeviceBuffer {
    /// Allocate a zero-filled buffer of `capacity` bytes
    ///
    /// # Errors
    /// `AllocationFailed` if the capacity is zero or the memory cannot be reserved.
    pub fn allocate(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::AllocationFailed { capacity });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailed { capacity })?;
        data.resize(capacity, 0);
        log::debug!("allocated device buffer of {capacity} bytes");
        Ok(Self(data.into_boxed_slice()))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.len()
    }

    /// Validate `offset` against the capacity and convert it to an index
    fn position(&self, offset: u64) -> Result<usize> {
        let pos = usize::try_from(offset).map_err(|_| Error::InvalidOffset)?;
        if pos > self.capacity() {
            return Err(Error::InvalidOffset);
        }
        Ok(pos)
    }

    /// Read up to `dst.len()` bytes starting at `offset`
    ///
    /// The count is clamped to the bytes remaining before the end; at the end
    /// of the device the count is zero, which is not an error.
    ///
    /// # Errors
    /// `InvalidOffset` if `offset` lies beyond the capacity.
    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<IoOutcome> {
        let pos = self.position(offset)?;
        let count = dst.len().min(self.capacity() - pos);
        dst[..count].copy_from_slice(&self.0[pos..pos + count]);
        log::trace!("read {count} bytes at {pos}");
        Ok(IoOutcome {
            count,
            offset: (pos + count) as u64,
        })
    }

    /// Write up to `src.len()` bytes starting at `offset`
    ///
    /// The count is clamped to the bytes remaining before the end.
    ///
    /// # Errors
    /// - `InvalidOffset` if `offset` lies beyond the capacity
    /// - `OutOfSpace` if nothing can be written (offset at the end, or empty `src`)
    pub fn write(&mut self, offset: u64, src: &[u8]) -> Result<IoOutcome> {
        let pos = self.position(offset)?;
        let count = src.len().min(self.capacity() - pos);
        if count == 0 {
            log::warn!("no space left on the device at offset {pos}");
            return Err(Error::OutOfSpace);
        }
        self.0[pos..pos + count].copy_from_slice(&src[..count]);
        log::trace!("wrote {count} bytes at {pos}");
        Ok(IoOutcome {
            count,
            offset: (pos + count) as u64,
        })
    }

    /// Compute the offset a seek would move to
    ///
    /// Does not modify anything; the caller stores the returned offset.
    ///
    /// # Errors
    /// `InvalidOffset` if the target is outside `[0, capacity]` or the
    /// arithmetic overflows.
    pub fn seek(&self, current: u64, offset: i64, whence: Whence) -> Result<u64> {
        let capacity = i64::try_from(self.capacity()).map_err(|_| Error::InvalidOffset)?;
        let reference = match whence {
            Whence::Set => 0,
            Whence::Cur => i64::try_from(current).map_err(|_| Error::InvalidOffset)?,
            Whence::End => capacity,
        };
        let target = reference
            .checked_add(offset)
            .ok_or(Error::InvalidOffset)?;
        if !(0..=capacity).contains(&target) {
            return Err(Error::InvalidOffset);
        }
        u64::try_from(target).map_err(|_| Error::InvalidOffset)
    }
}

impl Deref for DeviceBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for DeviceBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buffer = DeviceBuffer::allocate(16).unwrap();
        assert_eq!(buffer.capacity(), 16);
        assert!(buffer.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = DeviceBuffer::allocate(0);
        assert_eq!(result.unwrap_err(), Error::AllocationFailed { capacity: 0 });
    }

    #[test]
    fn test_huge_capacity_fails_gracefully() {
        let result = DeviceBuffer::allocate(usize::MAX);
        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
    }

    #[test]
    fn test_write_and_read_back() {
        let mut buffer = DeviceBuffer::allocate(32).unwrap();
        let written = buffer.write(0, b"hello").unwrap();
        assert_eq!(written, IoOutcome { count: 5, offset: 5 });

        let mut out = [0u8; 5];
        let read = buffer.read(0, &mut out).unwrap();
        assert_eq!(read, IoOutcome { count: 5, offset: 5 });
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn test_write_is_clamped() {
        let mut buffer = DeviceBuffer::allocate(512).unwrap();
        let written = buffer.write(500, &[0xAA; 50]).unwrap();
        assert_eq!(written.count, 12);
        assert_eq!(written.offset, 512);
    }

    #[test]
    fn test_write_at_end_is_out_of_space() {
        let mut buffer = DeviceBuffer::allocate(8).unwrap();
        assert_eq!(buffer.write(8, b"x"), Err(Error::OutOfSpace));
    }

    #[test]
    fn test_empty_write_is_out_of_space() {
        let mut buffer = DeviceBuffer::allocate(8).unwrap();
        assert_eq!(buffer.write(0, b""), Err(Error::OutOfSpace));
    }

    #[test]
    fn test_read_at_end_returns_zero() {
        let buffer = DeviceBuffer::allocate(8).unwrap();
        let mut out = [0u8; 4];
        let read = buffer.read(8, &mut out).unwrap();
        assert_eq!(read, IoOutcome { count: 0, offset: 8 });
    }

    #[test]
    fn test_offset_beyond_capacity_is_invalid() {
        let mut buffer = DeviceBuffer::allocate(8).unwrap();
        let mut out = [0u8; 1];
        assert_eq!(buffer.read(9, &mut out), Err(Error::InvalidOffset));
        assert_eq!(buffer.write(u64::MAX, b"x"), Err(Error::InvalidOffset));
    }

    #[test]
    fn test_seek_variants() {
        let buffer = DeviceBuffer::allocate(100).unwrap();
        assert_eq!(buffer.seek(10, 40, Whence::Set), Ok(40));
        assert_eq!(buffer.seek(10, 5, Whence::Cur), Ok(15));
        assert_eq!(buffer.seek(10, -10, Whence::Cur), Ok(0));
        assert_eq!(buffer.seek(10, -30, Whence::End), Ok(70));
        assert_eq!(buffer.seek(10, 0, Whence::End), Ok(100));
    }

    #[test]
    fn test_seek_out_of_bounds() {
        let buffer = DeviceBuffer::allocate(100).unwrap();
        assert_eq!(buffer.seek(0, -1, Whence::Set), Err(Error::InvalidOffset));
        assert_eq!(buffer.seek(0, 101, Whence::Set), Err(Error::InvalidOffset));
        assert_eq!(buffer.seek(50, -51, Whence::Cur), Err(Error::InvalidOffset));
        assert_eq!(buffer.seek(0, 1, Whence::End), Err(Error::InvalidOffset));
    }

    #[test]
    fn test_seek_overflow_is_invalid() {
        let buffer = DeviceBuffer::allocate(100).unwrap();
        assert_eq!(buffer.seek(50, i64::MAX, Whence::Cur), Err(Error::InvalidOffset));
        assert_eq!(buffer.seek(u64::MAX, 0, Whence::Cur), Err(Error::InvalidOffset));
    }

    #[test]
    fn test_whence_from_raw() {
        assert_eq!(Whence::try_from(0), Ok(Whence::Set));
        assert_eq!(Whence::try_from(1), Ok(Whence::Cur));
        assert_eq!(Whence::try_from(2), Ok(Whence::End));
        assert_eq!(Whence::try_from(3), Err(Error::InvalidOffset));
        assert_eq!(Whence::try_from(-1), Err(Error::InvalidOffset));
    }
}
