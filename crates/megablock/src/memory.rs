//! The memory provider: the allocator's only source and sink of raw units.
//!
//! [`MemoryProvider`] is the seam between the heap allocator and whatever
//! owns the address space. [`LinearMemory`] is the default implementation: a
//! single reserved region addressed by byte offset, carved into
//! [`UNIT_SIZE`] units tracked in a bitmap.

use sys_alloc::Region;

use crate::error::HeapError;
use crate::layout::{Address, UNIT_SIZE};

/// Source of fixed-size units plus typed access to the memory behind them.
///
/// Addresses are plain integers in a flat, byte-addressable space. Loads and
/// stores are little-endian and need not be aligned.
pub trait MemoryProvider {
    /// Acquire `n` contiguous fresh units and return the base address.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::ProviderExhausted`] when no run of `n` free units
    /// exists, or [`HeapError::Os`] if backing the units fails.
    fn acquire_units(&mut self, n: usize) -> Result<Address, HeapError>;

    /// Return `n` contiguous units starting at `base` for reuse.
    fn release_units(&mut self, base: Address, n: usize);

    /// Load a byte.
    fn load_u8(&self, addr: Address) -> u8;
    /// Load a 16-bit value.
    fn load_u16(&self, addr: Address) -> u16;
    /// Load a 32-bit value.
    fn load_u32(&self, addr: Address) -> u32;
    /// Load a 64-bit value.
    fn load_u64(&self, addr: Address) -> u64;

    /// Store a byte.
    fn store_u8(&mut self, addr: Address, value: u8);
    /// Store a 16-bit value.
    fn store_u16(&mut self, addr: Address, value: u16);
    /// Store a 32-bit value.
    fn store_u32(&mut self, addr: Address, value: u32);
    /// Store a 64-bit value.
    fn store_u64(&mut self, addr: Address, value: u64);
}

// ============================================================================
// UnitMap - occupancy bitmap
// ============================================================================

/// One bit per unit; a set bit means the unit is acquired.
#[derive(Debug, Clone)]
pub struct UnitMap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl UnitMap {
    /// Create a map of `len` free units.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
            used: 0,
        }
    }

    /// Number of units tracked.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the map tracks no units.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of acquired units.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Whether unit `index` is acquired.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        (self.words[index / 64] >> (index % 64)) & 1 != 0
    }

    fn set(&mut self, index: usize, value: bool) {
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Mark `[first, first + n)` acquired.
    ///
    /// # Panics
    ///
    /// Panics if any unit in the range is already acquired.
    pub fn set_range(&mut self, first: usize, n: usize) {
        for index in first..first + n {
            assert!(!self.is_set(index), "unit {index} is already acquired");
            self.set(index, true);
        }
        self.used += n;
    }

    /// Mark `[first, first + n)` free.
    ///
    /// # Panics
    ///
    /// Panics if any unit in the range is not acquired.
    pub fn clear_range(&mut self, first: usize, n: usize) {
        for index in first..first + n {
            assert!(self.is_set(index), "unit {index} is not acquired");
            self.set(index, false);
        }
        self.used -= n;
    }

    /// First-fit search for `n` contiguous free units.
    #[must_use]
    pub fn find_free_run(&self, n: usize) -> Option<usize> {
        if n == 0 || n > self.len - self.used {
            return None;
        }
        let mut run_start = 0;
        let mut run_len = 0;
        let mut index = 0;
        while index < self.len {
            // Skip fully acquired words.
            if index % 64 == 0 && self.words[index / 64] == u64::MAX {
                run_len = 0;
                index += 64;
                continue;
            }
            if self.is_set(index) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len == n {
                    return Some(run_start);
                }
            }
            index += 1;
        }
        None
    }
}

// ============================================================================
// LinearMemory - reserved linear address space
// ============================================================================

/// A linear address space of `capacity_units()` units.
///
/// Address `a` is byte offset `a` into one reserved [`Region`]. Unit 0 holds
/// the null address and is never handed out.
pub struct LinearMemory {
    region: Region,
    units: UnitMap,
}

impl LinearMemory {
    /// Reserve address space for `max_units` units.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] if fewer than two units are
    /// requested and [`HeapError::Os`] if the reservation fails.
    pub fn new(max_units: usize) -> Result<Self, HeapError> {
        if max_units < 2 {
            return Err(HeapError::InvalidConfig(
                "linear memory needs a null unit and at least one usable unit",
            ));
        }
        let len = max_units
            .checked_mul(UNIT_SIZE)
            .ok_or(HeapError::InvalidConfig("max_units overflows the address space"))?;
        let region = Region::reserve(len)?;
        let mut units = UnitMap::new(max_units);
        units.set_range(0, 1);
        Ok(Self { region, units })
    }

    /// Total units in the address space, including the null unit.
    #[must_use]
    pub const fn capacity_units(&self) -> usize {
        self.units.len()
    }

    /// Units currently acquired, excluding the null unit.
    #[must_use]
    pub const fn units_in_use(&self) -> usize {
        self.units.used() - 1
    }

    /// Whether the unit containing `addr` is currently acquired.
    #[must_use]
    pub fn is_acquired(&self, addr: Address) -> bool {
        let index = addr / UNIT_SIZE;
        index != 0 && index < self.units.len() && self.units.is_set(index)
    }

    fn check(&self, addr: Address, width: usize) -> *mut u8 {
        assert!(
            addr >= UNIT_SIZE && addr.checked_add(width).is_some_and(|end| end <= self.region.len()),
            "memory access at {addr:#x} (width {width}) is outside linear memory"
        );
        // SAFETY: bounds checked above.
        unsafe { self.region.ptr().add(addr) }
    }

    fn read<const N: usize>(&self, addr: Address) -> [u8; N] {
        let ptr = self.check(addr, N);
        // SAFETY: `check` proved `[addr, addr + N)` lies inside the region.
        unsafe { ptr.cast::<[u8; N]>().read_unaligned() }
    }

    fn write<const N: usize>(&mut self, addr: Address, bytes: [u8; N]) {
        let ptr = self.check(addr, N);
        // SAFETY: `check` proved `[addr, addr + N)` lies inside the region,
        // and `&mut self` rules out aliasing accesses.
        unsafe { ptr.cast::<[u8; N]>().write_unaligned(bytes) }
    }
}

impl MemoryProvider for LinearMemory {
    fn acquire_units(&mut self, n: usize) -> Result<Address, HeapError> {
        let first = self
            .units
            .find_free_run(n)
            .ok_or(HeapError::ProviderExhausted { requested: n })?;
        let base = first * UNIT_SIZE;
        self.region.commit(base, n * UNIT_SIZE)?;
        self.units.set_range(first, n);
        Ok(base)
    }

    fn release_units(&mut self, base: Address, n: usize) {
        assert!(
            base % UNIT_SIZE == 0 && base != 0,
            "release of {base:#x}: not a unit base address"
        );
        self.units.clear_range(base / UNIT_SIZE, n);
        // The units are free either way; a failed decommit only leaves the
        // pages resident.
        if let Err(_err) = self.region.decommit(base, n * UNIT_SIZE) {
            #[cfg(feature = "tracing")]
            tracing::warn!(base, units = n, error = %_err, "decommit_failed");
        }
    }

    fn load_u8(&self, addr: Address) -> u8 {
        u8::from_le_bytes(self.read(addr))
    }

    fn load_u16(&self, addr: Address) -> u16 {
        u16::from_le_bytes(self.read(addr))
    }

    fn load_u32(&self, addr: Address) -> u32 {
        u32::from_le_bytes(self.read(addr))
    }

    fn load_u64(&self, addr: Address) -> u64 {
        u64::from_le_bytes(self.read(addr))
    }

    fn store_u8(&mut self, addr: Address, value: u8) {
        self.write(addr, value.to_le_bytes());
    }

    fn store_u16(&mut self, addr: Address, value: u16) {
        self.write(addr, value.to_le_bytes());
    }

    fn store_u32(&mut self, addr: Address, value: u32) {
        self.write(addr, value.to_le_bytes());
    }

    fn store_u64(&mut self, addr: Address, value: u64) {
        self.write(addr, value.to_le_bytes());
    }
}
