//! Reserved address-space regions.
//!
//! A [`Region`] reserves a contiguous range of virtual address space up front
//! and lets the caller commit and decommit page-aligned sub-ranges of it. The
//! region never moves, so offsets into it are stable for its whole lifetime.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is typically the system page size.
/// Region lengths are rounded up to this granularity.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// A reserved range of address space.
///
/// The whole range is released when this handle is dropped.
pub struct Region {
    inner: os::RegionInner,
}

impl Region {
    /// Reserves `len` bytes of address space.
    ///
    /// No physical memory is committed by the reservation itself. On Unix the
    /// range is mapped read/write with `MAP_NORESERVE` and pages are faulted in
    /// lazily; on Windows the range must be committed before it is touched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length and the OS error if the
    /// reservation fails.
    pub fn reserve(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }
        let len = round_up(len, allocation_granularity());
        // SAFETY: a fresh reservation aliases no existing memory.
        let inner = unsafe { os::RegionInner::reserve(len)? };
        Ok(Self { inner })
    }

    /// Returns a pointer to the start of the region.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the region is empty. Reserved regions never are.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes `[offset, offset + len)` readable and writable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the range is not page aligned or falls outside
    /// the region, and the OS error if the commit fails.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        // SAFETY: the range was checked against the reservation.
        unsafe { self.inner.commit(offset, len) }
    }

    /// Returns the physical pages backing `[offset, offset + len)` to the OS.
    ///
    /// The address range stays reserved. Its contents are lost; on Unix the
    /// pages read back as zero, on Windows they must be committed again
    /// before use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the range is not page aligned or falls outside
    /// the region, and the OS error if the decommit fails.
    pub fn decommit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        // SAFETY: the range was checked against the reservation.
        unsafe { self.inner.decommit(offset, len) }
    }

    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        let page = page_size();
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len());
        if offset % page != 0 || len % page != 0 || !in_bounds {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "range must be page aligned and inside the region",
            ));
        }
        Ok(())
    }
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

const fn round_up(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}
