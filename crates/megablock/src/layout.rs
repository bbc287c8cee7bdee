//! Heap geometry and the block descriptor binary layout.
//!
//! Memory is acquired in fixed 1 MiB units. One or more contiguous units form
//! a MegaGroup, whose first unit starts with a reserved header region holding
//! the group's [`BlockDescriptor`]. Usable space begins at
//! [`FIRST_BLOCK_OFFSET`] and is measured in 4 KiB sub-blocks.
//!
//! # Descriptor layout
//!
//! The descriptor sits at offset 0 of the group's first unit, so the
//! descriptor handle and the group's base address are the same value. All
//! fields are little-endian:
//!
//! | field    | offset | width |
//! |----------|--------|-------|
//! | `start`  | 0      | 64    |
//! | `free`   | 8      | 64    |
//! | `link`   | 16     | 64    |
//! | `units`  | 24     | 32    |
//! | `blocks` | 28     | 32    |
//! | `flags`  | 32     | 16    |
//! | `gen_no` | 34     | 16    |
//!
//! Compiled program code and the collector read these fields directly, so the
//! offsets must not change.

use std::fmt;

use crate::error::HeapError;
use crate::memory::MemoryProvider;

// ============================================================================
// Geometry
// ============================================================================

/// A byte address inside the provider's linear address space.
pub type Address = usize;

/// The null address. The provider never hands out the unit containing it.
pub const NULL_ADDR: Address = 0;

/// Size of a machine word in bytes. Allocation requests are in words.
pub const WORD_SIZE: usize = 8;

/// log2 of [`UNIT_SIZE`].
pub const UNIT_SIZE_BITS: usize = 20;

/// Size of one unit (MBlock) acquired from the memory provider.
pub const UNIT_SIZE: usize = 1 << UNIT_SIZE_BITS;

/// log2 of [`BLOCK_SIZE`].
pub const BLOCK_SIZE_BITS: usize = 12;

/// Size of one sub-block. Requests of at least this many bytes are large
/// objects and always go to the pinned pool.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_BITS;

/// Bytes reserved for the header region at the base of a group's first unit.
pub const FIRST_BLOCK_OFFSET: usize = 4 * BLOCK_SIZE;

/// Usable sub-blocks in a single-unit group.
pub const BLOCKS_PER_UNIT: usize = (UNIT_SIZE - FIRST_BLOCK_OFFSET) / BLOCK_SIZE;

/// Usable bytes in the first unit of a group.
pub const FIRST_UNIT_CAPACITY: usize = BLOCKS_PER_UNIT * BLOCK_SIZE;

/// Usable sub-blocks in a group of `units` contiguous units.
#[must_use]
pub const fn blocks_for_units(units: usize) -> usize {
    (units * UNIT_SIZE - FIRST_BLOCK_OFFSET) / BLOCK_SIZE
}

/// Number of units a group needs to hold `bytes` of usable space.
///
/// The first unit loses [`FIRST_BLOCK_OFFSET`] bytes to the header region;
/// every further unit is fully usable.
#[must_use]
pub const fn size_for_bytes(bytes: usize) -> usize {
    if bytes <= FIRST_UNIT_CAPACITY {
        1
    } else {
        1 + (bytes - FIRST_UNIT_CAPACITY).div_ceil(UNIT_SIZE)
    }
}

// ============================================================================
// Descriptor field offsets
// ============================================================================

/// Offset of the descriptor within the group's first unit.
pub const OFFSET_FIRST_BDESCR: usize = 0;
/// Offset of `start`: first usable address.
pub const OFFSET_BDESCR_START: usize = 0;
/// Offset of `free`: the bump cursor.
pub const OFFSET_BDESCR_FREE: usize = 8;
/// Offset of `link`: reserved for external use.
pub const OFFSET_BDESCR_LINK: usize = 16;
/// Offset of `units`: units in the group.
pub const OFFSET_BDESCR_UNITS: usize = 24;
/// Offset of `blocks`: usable sub-blocks in the group.
pub const OFFSET_BDESCR_BLOCKS: usize = 28;
/// Offset of `flags`.
pub const OFFSET_BDESCR_FLAGS: usize = 32;
/// Offset of `gen_no`.
pub const OFFSET_BDESCR_GEN_NO: usize = 34;
/// Bytes occupied by the descriptor.
pub const BDESCR_SIZE: usize = 36;

/// `flags` bit marking a group whose contents are never relocated.
pub const BF_PINNED: u16 = 0x0001;

// ============================================================================
// MegaGroup handle
// ============================================================================

/// Opaque handle to a MegaGroup: the address of its block descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MegaGroup(Address);

impl MegaGroup {
    /// Handle that names no group. Never registered.
    pub const NULL: Self = Self(NULL_ADDR);

    /// Wrap a descriptor address.
    #[must_use]
    pub const fn from_addr(addr: Address) -> Self {
        Self(addr)
    }

    /// Descriptor address.
    #[must_use]
    pub const fn addr(self) -> Address {
        self.0
    }

    /// Whether this is [`MegaGroup::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_ADDR
    }

    /// Base address of the group's first unit.
    #[must_use]
    pub const fn base(self) -> Address {
        self.0 - OFFSET_FIRST_BDESCR
    }

    const fn field(self, offset: usize) -> Address {
        self.0 + offset
    }
}

impl fmt::Display for MegaGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ============================================================================
// BlockDescriptor
// ============================================================================

/// Value snapshot of a descriptor as stored in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// First usable address.
    pub start: Address,
    /// Next allocation address.
    pub free: Address,
    /// Link field, reserved for external use.
    pub link: Address,
    /// Units in the group.
    pub units: u32,
    /// Usable sub-blocks in the group.
    pub blocks: u32,
    /// Flag bits (`BF_PINNED`).
    pub flags: u16,
    /// Generation number.
    pub gen_no: u16,
}

impl BlockDescriptor {
    /// Descriptor for a freshly acquired group based at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `units` is zero or the group's geometry overflows the
    /// descriptor's 32-bit counts.
    #[must_use]
    pub fn fresh(base: Address, units: usize, pinned: bool, gen_no: u16) -> Self {
        assert!(units > 0, "a MegaGroup needs at least one unit");
        let start = base + FIRST_BLOCK_OFFSET;
        Self {
            start,
            free: start,
            link: NULL_ADDR,
            units: u32::try_from(units).expect("unit count exceeds descriptor width"),
            blocks: u32::try_from(blocks_for_units(units))
                .expect("block count exceeds descriptor width"),
            flags: if pinned { BF_PINNED } else { 0 },
            gen_no,
        }
    }

    /// Read the descriptor of `group` from memory.
    pub fn load<M: MemoryProvider + ?Sized>(mem: &M, group: MegaGroup) -> Self {
        Self {
            start: to_addr(mem.load_u64(group.field(OFFSET_BDESCR_START))),
            free: to_addr(mem.load_u64(group.field(OFFSET_BDESCR_FREE))),
            link: to_addr(mem.load_u64(group.field(OFFSET_BDESCR_LINK))),
            units: mem.load_u32(group.field(OFFSET_BDESCR_UNITS)),
            blocks: mem.load_u32(group.field(OFFSET_BDESCR_BLOCKS)),
            flags: mem.load_u16(group.field(OFFSET_BDESCR_FLAGS)),
            gen_no: mem.load_u16(group.field(OFFSET_BDESCR_GEN_NO)),
        }
    }

    /// Write every field of this descriptor to `group`'s header.
    pub fn store<M: MemoryProvider + ?Sized>(&self, mem: &mut M, group: MegaGroup) {
        mem.store_u64(group.field(OFFSET_BDESCR_START), self.start as u64);
        mem.store_u64(group.field(OFFSET_BDESCR_FREE), self.free as u64);
        mem.store_u64(group.field(OFFSET_BDESCR_LINK), self.link as u64);
        mem.store_u32(group.field(OFFSET_BDESCR_UNITS), self.units);
        mem.store_u32(group.field(OFFSET_BDESCR_BLOCKS), self.blocks);
        mem.store_u16(group.field(OFFSET_BDESCR_FLAGS), self.flags);
        mem.store_u16(group.field(OFFSET_BDESCR_GEN_NO), self.gen_no);
    }

    /// Usable bytes in the group.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.blocks as usize * BLOCK_SIZE
    }

    /// One past the last usable address.
    #[must_use]
    pub const fn limit(&self) -> Address {
        self.start + self.capacity()
    }

    /// Bytes still available to the bump cursor.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.free)
    }

    /// Whether the group is flagged pinned.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.flags & BF_PINNED != 0
    }

    /// Check `start <= free <= limit` and a non-zero unit count.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::MalformedDescriptor`] naming `group`.
    pub fn validate(&self, group: MegaGroup) -> Result<(), HeapError> {
        if self.units == 0 || self.free < self.start || self.free > self.limit() {
            return Err(HeapError::MalformedDescriptor { group });
        }
        Ok(())
    }
}

/// Read only the bump cursor of `group`.
pub(crate) fn load_free<M: MemoryProvider + ?Sized>(mem: &M, group: MegaGroup) -> Address {
    to_addr(mem.load_u64(group.field(OFFSET_BDESCR_FREE)))
}

/// Overwrite only the bump cursor of `group`.
pub(crate) fn store_free<M: MemoryProvider + ?Sized>(mem: &mut M, group: MegaGroup, free: Address) {
    mem.store_u64(group.field(OFFSET_BDESCR_FREE), free as u64);
}

/// Read `start + blocks * BLOCK_SIZE` for `group`.
pub(crate) fn load_limit<M: MemoryProvider + ?Sized>(mem: &M, group: MegaGroup) -> Address {
    let start = to_addr(mem.load_u64(group.field(OFFSET_BDESCR_START)));
    let blocks = mem.load_u32(group.field(OFFSET_BDESCR_BLOCKS)) as usize;
    start + blocks * BLOCK_SIZE
}

/// Read only the unit count of `group`.
pub(crate) fn load_units<M: MemoryProvider + ?Sized>(mem: &M, group: MegaGroup) -> usize {
    mem.load_u32(group.field(OFFSET_BDESCR_UNITS)) as usize
}

#[allow(clippy::cast_possible_truncation)]
const fn to_addr(raw: u64) -> Address {
    raw as Address
}
