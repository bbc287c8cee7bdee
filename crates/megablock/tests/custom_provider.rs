//! The allocator only talks to memory through `MemoryProvider`, so any
//! backing store works. These tests drive it over a plain `Vec<u8>` and
//! record every unit that comes back.

use std::collections::HashSet;

use megablock::layout::{
    BlockDescriptor, FIRST_BLOCK_OFFSET, OFFSET_BDESCR_FLAGS, OFFSET_BDESCR_FREE, OFFSET_BDESCR_GEN_NO,
    OFFSET_BDESCR_LINK, OFFSET_BDESCR_START, OFFSET_BDESCR_UNITS, UNIT_SIZE, WORD_SIZE,
};
use megablock::memory::UnitMap;
use megablock::{
    Address, CollectionType, HeapAllocator, HeapConfig, HeapError, MegaGroup, MemoryProvider,
};

struct VecMemory {
    bytes: Vec<u8>,
    units: UnitMap,
    released: Vec<(Address, usize)>,
    refuse: bool,
}

impl VecMemory {
    fn new(units: usize) -> Self {
        let mut map = UnitMap::new(units);
        map.set_range(0, 1);
        Self {
            bytes: vec![0; units * UNIT_SIZE],
            units: map,
            released: Vec::new(),
            refuse: false,
        }
    }

    fn slice<const N: usize>(&self, addr: Address) -> [u8; N] {
        self.bytes[addr..addr + N].try_into().unwrap()
    }
}

impl MemoryProvider for VecMemory {
    fn acquire_units(&mut self, n: usize) -> Result<Address, HeapError> {
        if self.refuse {
            return Err(HeapError::ProviderExhausted { requested: n });
        }
        let first = self
            .units
            .find_free_run(n)
            .ok_or(HeapError::ProviderExhausted { requested: n })?;
        self.units.set_range(first, n);
        Ok(first * UNIT_SIZE)
    }

    fn release_units(&mut self, base: Address, n: usize) {
        self.units.clear_range(base / UNIT_SIZE, n);
        self.released.push((base, n));
    }

    fn load_u8(&self, addr: Address) -> u8 {
        self.bytes[addr]
    }

    fn load_u16(&self, addr: Address) -> u16 {
        u16::from_le_bytes(self.slice(addr))
    }

    fn load_u32(&self, addr: Address) -> u32 {
        u32::from_le_bytes(self.slice(addr))
    }

    fn load_u64(&self, addr: Address) -> u64 {
        u64::from_le_bytes(self.slice(addr))
    }

    fn store_u8(&mut self, addr: Address, value: u8) {
        self.bytes[addr] = value;
    }

    fn store_u16(&mut self, addr: Address, value: u16) {
        self.bytes[addr..addr + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn store_u32(&mut self, addr: Address, value: u32) {
        self.bytes[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn store_u64(&mut self, addr: Address, value: u64) {
        self.bytes[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
    }
}

fn heap(units: usize) -> HeapAllocator<VecMemory> {
    HeapAllocator::with_provider(HeapConfig::default(), VecMemory::new(units)).unwrap()
}

#[test]
fn test_descriptor_bytes_follow_layout() {
    let mut heap = heap(8);
    let group = heap.allocate_mega_group(2, true, 1).unwrap();
    let base = group.base();
    let mem = heap.memory();

    let start = mem.load_u64(group.addr() + OFFSET_BDESCR_START);
    assert_eq!(start as usize, base + 4 * 4096);
    assert_eq!(mem.load_u64(group.addr() + OFFSET_BDESCR_FREE), start);
    assert_eq!(mem.load_u64(group.addr() + OFFSET_BDESCR_LINK), 0);
    assert_eq!(mem.load_u32(group.addr() + OFFSET_BDESCR_UNITS), 2);
    assert_eq!(mem.load_u16(group.addr() + OFFSET_BDESCR_FLAGS), 1);
    assert_eq!(mem.load_u16(group.addr() + OFFSET_BDESCR_GEN_NO), 1);

    // Little-endian: the low byte of `units` comes first.
    assert_eq!(mem.load_u8(group.addr() + OFFSET_BDESCR_UNITS), 2);
}

#[test]
fn test_cursor_lives_in_memory() {
    let mut heap = heap(8);
    let pool = heap.generation_pool(0).unwrap().unwrap();
    let addr = heap.allocate(3, false).unwrap();

    let raw = heap.memory().load_u64(pool.addr() + OFFSET_BDESCR_FREE);
    assert_eq!(raw as usize, addr + 3 * WORD_SIZE);
    assert_eq!(
        BlockDescriptor::load(heap.memory(), pool),
        heap.descriptor(pool).unwrap()
    );
}

#[test]
fn test_units_are_returned_to_provider() {
    let mut heap = heap(8);
    let a = heap.allocate_mega_group(2, false, 0).unwrap();
    let b = heap.allocate_mega_group(1, false, 0).unwrap();

    let dead: HashSet<MegaGroup> = [a, b].into_iter().collect();
    heap.handle_liveness(&HashSet::new(), &dead, CollectionType::Minor)
        .unwrap();

    let mut released = heap.memory().released.clone();
    released.sort_unstable();
    assert_eq!(released, vec![(a.base(), 2), (b.base(), 1)]);
}

#[test]
fn test_corrupted_descriptor_is_reported() {
    let mut heap = heap(8);
    let pool = heap.generation_pool(0).unwrap().unwrap();
    let limit = heap.descriptor(pool).unwrap().limit();
    heap.memory_mut()
        .store_u64(pool.addr() + OFFSET_BDESCR_FREE, (limit + WORD_SIZE) as u64);

    assert!(matches!(
        heap.descriptor(pool),
        Err(HeapError::MalformedDescriptor { group }) if group == pool
    ));
}

#[test]
fn test_init_fails_on_exhausted_provider() {
    // Only the null unit and one usable unit: the young pool cannot be acquired.
    let result = HeapAllocator::with_provider(HeapConfig::default(), VecMemory::new(2));
    assert!(matches!(
        result,
        Err(HeapError::ProviderExhausted { requested: 1 })
    ));
}

#[test]
fn test_failed_pinned_replacement_leaves_no_stale_pools() {
    let mut heap = heap(8);
    let everything: HashSet<MegaGroup> = heap.megagroups().collect();
    heap.memory_mut().refuse = true;

    let err = heap
        .handle_liveness(&HashSet::new(), &everything, CollectionType::Minor)
        .unwrap_err();
    assert!(matches!(err, HeapError::ProviderExhausted { requested: 1 }));
    assert_eq!(heap.registered_count(), 0);
    assert!(heap.current_pinned().is_null());
    assert_eq!(heap.generation_pool(0).unwrap(), None);
    assert_eq!(heap.memory().released.len(), 2);

    // Allocation fails cleanly instead of bumping a released descriptor.
    assert!(heap.allocate(2, false).is_err());
    assert!(heap.allocate_pinned(2).is_err());
    assert_eq!(heap.registered_count(), 0);

    heap.memory_mut().refuse = false;
    let addr = heap.allocate(2, false).unwrap();
    let young = heap.generation_pool(0).unwrap().unwrap();
    assert!(heap.is_registered(young));
    assert_eq!(addr, young.base() + FIRST_BLOCK_OFFSET);

    let pinned_addr = heap.allocate_pinned(2).unwrap();
    let pinned = heap.current_pinned();
    assert!(!pinned.is_null());
    assert!(heap.is_registered(pinned));
    assert_eq!(pinned_addr, pinned.base() + FIRST_BLOCK_OFFSET);
}
