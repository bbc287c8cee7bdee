//! The block-structured heap allocator.
//!
//! The allocator owns a registry of MegaGroups, one pinned pool shared by all
//! generations, and one unpinned pool per generation. Allocation bumps the
//! free cursor of the selected pool's descriptor; when the pool runs out a
//! fresh MegaGroup is acquired and the pool is rebound to it.
//!
//! # Reconciliation
//!
//! After every collection cycle the collector calls
//! [`HeapAllocator::handle_liveness`] with the groups it found live and the
//! groups it evacuated. Dead groups are always freed. Groups merely absent from
//! the live set are freed only on a [`CollectionType::Major`] cycle: pinned data
//! is never relocated, so a minor cycle's reachability result is not proof that
//! a pinned group is garbage.
//!
//! # Threading
//!
//! The allocator is single-threaded. Reconciliation must not interleave with
//! allocation; the collector stops the mutator for the whole cycle.

use std::collections::HashSet;

use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::layout::{
    load_free, load_limit, load_units, size_for_bytes, store_free, Address, BlockDescriptor,
    MegaGroup, BLOCK_SIZE, OFFSET_FIRST_BDESCR, WORD_SIZE,
};
use crate::memory::{LinearMemory, MemoryProvider};
use crate::metrics::{CollectionType, HeapStats, ReconcileStats};
use crate::tracing::internal::{
    log_group_acquired, log_group_released, log_invalid_reference, log_pool_refill,
    log_reconcile_end, next_cycle_id, trace_reconcile,
};

/// Block-structured heap allocator over a [`MemoryProvider`].
pub struct HeapAllocator<M: MemoryProvider = LinearMemory> {
    /// Source and sink of raw units.
    memory: M,
    /// Every MegaGroup the allocator owns.
    mgroups: HashSet<MegaGroup>,
    /// Pool for pinned and large allocations; [`MegaGroup::NULL`] while no
    /// pool is bound.
    current_pinned: MegaGroup,
    /// Unpinned pool per generation; `None` until first use or after the
    /// pool was freed by reconciliation.
    generations: Vec<Option<MegaGroup>>,
    /// Generation whose unpinned pool receives unpinned allocations.
    gen_no: usize,
    stats: HeapStats,
    config: HeapConfig,
}

impl HeapAllocator<LinearMemory> {
    /// Create an allocator over a fresh [`LinearMemory`] of
    /// `config.max_units` units.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] for a rejected configuration,
    /// [`HeapError::Os`] if the address space cannot be reserved, and any
    /// error from initializing the pools.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        let memory = LinearMemory::new(config.max_units)?;
        Self::with_provider(config, memory)
    }
}

impl<M: MemoryProvider> HeapAllocator<M> {
    /// Create an allocator over `memory` and initialize its pools.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] for a rejected configuration and
    /// [`HeapError::ProviderExhausted`] if the initial pools cannot be
    /// acquired.
    pub fn with_provider(config: HeapConfig, memory: M) -> Result<Self, HeapError> {
        config.validate()?;
        let mut heap = Self {
            memory,
            mgroups: HashSet::new(),
            current_pinned: MegaGroup::NULL,
            generations: vec![None; config.generations],
            gen_no: 0,
            stats: HeapStats::default(),
            config,
        };
        heap.init()?;
        Ok(heap)
    }

    /// Acquire the pinned pool and activate generation 0.
    fn init(&mut self) -> Result<(), HeapError> {
        self.current_pinned = self.allocate_mega_group(1, true, 0)?;
        self.set_generation_no(0, false)
    }

    // ========================================================================
    // Generations
    // ========================================================================

    /// Route unpinned allocation to generation `gen`.
    ///
    /// If `gen` has no stored pool, or `force_new_alloc` is set, a fresh
    /// one-unit pool is acquired for it first. A replaced pool stays
    /// registered until a collection frees it.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidGeneration`] for an out-of-range `gen` and
    /// [`HeapError::ProviderExhausted`] if a new pool cannot be acquired.
    pub fn set_generation_no(&mut self, gen: usize, force_new_alloc: bool) -> Result<(), HeapError> {
        self.check_generation(gen)?;
        if force_new_alloc || self.generations[gen].is_none() {
            let pool = self.allocate_mega_group(1, false, gen)?;
            self.generations[gen] = Some(pool);
        }
        self.gen_no = gen;
        Ok(())
    }

    /// Generation currently receiving unpinned allocations.
    #[must_use]
    pub const fn current_generation(&self) -> usize {
        self.gen_no
    }

    /// Stored unpinned pool of generation `gen`.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidGeneration`] for an out-of-range `gen`.
    pub fn generation_pool(&self, gen: usize) -> Result<Option<MegaGroup>, HeapError> {
        self.check_generation(gen)?;
        Ok(self.generations[gen])
    }

    /// The pinned pool.
    ///
    /// [`MegaGroup::NULL`] if reconciliation freed the pool and could not
    /// replace it; the next pinned allocation acquires a new one.
    #[must_use]
    pub const fn current_pinned(&self) -> MegaGroup {
        self.current_pinned
    }

    fn check_generation(&self, gen: usize) -> Result<(), HeapError> {
        if gen >= self.generations.len() {
            return Err(HeapError::InvalidGeneration {
                gen,
                generations: self.generations.len(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `n` words and return the address of the first byte.
    ///
    /// Requests of at least [`BLOCK_SIZE`] bytes are always served from the
    /// pinned pool, whatever `pinned` says. The memory is not zeroed and
    /// belongs to the caller until the next collection.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::ProviderExhausted`] if the pool must grow and the
    /// provider has no room, and [`HeapError::MalformedDescriptor`] if the
    /// pool's free cursor lies past its limit.
    pub fn allocate(&mut self, n: usize, pinned: bool) -> Result<Address, HeapError> {
        let bytes = n.saturating_mul(WORD_SIZE);
        let pinned = pinned || bytes >= BLOCK_SIZE;
        let pool = if pinned {
            Some(self.current_pinned).filter(|pool| !pool.is_null())
        } else {
            self.generations[self.gen_no]
        };

        if let Some(pool) = pool {
            if let Some(addr) = self.bump(pool, bytes)? {
                self.stats.allocations += 1;
                self.stats.bytes_allocated += bytes;
                return Ok(addr);
            }
        }
        self.refill(bytes, pinned)
    }

    /// Allocate `n` words from the pinned pool.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::ProviderExhausted`] if the pool must grow and the
    /// provider has no room.
    pub fn allocate_pinned(&mut self, n: usize) -> Result<Address, HeapError> {
        self.allocate(n, true)
    }

    /// Fast path: advance `pool`'s free cursor by `bytes` if it fits.
    ///
    /// Returns `Ok(None)` when the pool is full.
    fn bump(&mut self, pool: MegaGroup, bytes: usize) -> Result<Option<Address>, HeapError> {
        let free = load_free(&self.memory, pool);
        let remaining = load_limit(&self.memory, pool)
            .checked_sub(free)
            .ok_or(HeapError::MalformedDescriptor { group: pool })?;
        if bytes > remaining {
            return Ok(None);
        }
        store_free(&mut self.memory, pool, free + bytes);
        Ok(Some(free))
    }

    /// Slow path: acquire a group big enough for `bytes`, rebind the pool to
    /// it and allocate from its start.
    fn refill(&mut self, bytes: usize, pinned: bool) -> Result<Address, HeapError> {
        let gen = self.gen_no;
        let group = self.allocate_mega_group(size_for_bytes(bytes), pinned, gen)?;
        log_pool_refill(pinned, gen, bytes);
        if pinned {
            self.current_pinned = group;
        } else {
            self.generations[gen] = Some(group);
        }
        self.stats.pool_refills += 1;

        let addr = self
            .bump(group, bytes)?
            .ok_or(HeapError::MalformedDescriptor { group })?;
        self.stats.allocations += 1;
        self.stats.bytes_allocated += bytes;
        Ok(addr)
    }

    // ========================================================================
    // MegaGroups
    // ========================================================================

    /// Acquire `n_units` contiguous units, write a fresh descriptor into the
    /// first one and register the group.
    ///
    /// This is the only way memory enters the registry.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidGeneration`] for an out-of-range `gen` and
    /// [`HeapError::ProviderExhausted`] if the provider has no room.
    ///
    /// # Panics
    ///
    /// Panics if `n_units` is zero.
    pub fn allocate_mega_group(
        &mut self,
        n_units: usize,
        pinned: bool,
        gen: usize,
    ) -> Result<MegaGroup, HeapError> {
        assert!(n_units > 0, "a MegaGroup needs at least one unit");
        self.check_generation(gen)?;
        #[allow(clippy::cast_possible_truncation)]
        let gen_no = gen as u16;

        let base = self.memory.acquire_units(n_units)?;
        let group = MegaGroup::from_addr(base + OFFSET_FIRST_BDESCR);
        BlockDescriptor::fresh(base, n_units, pinned, gen_no).store(&mut self.memory, group);
        self.mgroups.insert(group);

        self.stats.groups_acquired += 1;
        self.stats.units_acquired += n_units;
        log_group_acquired(group, n_units, pinned, gen_no);
        Ok(group)
    }

    /// Deregister `group` and return its units to the provider.
    fn free_mega_group(&mut self, group: MegaGroup) -> usize {
        let units = load_units(&self.memory, group);
        self.mgroups.remove(&group);
        self.memory.release_units(group.base(), units);

        self.stats.groups_released += 1;
        self.stats.units_released += units;
        log_group_released(group, units);
        units
    }

    // ========================================================================
    // Post-collection reconciliation
    // ========================================================================

    /// Reconcile the registry with the collector's view after a cycle.
    ///
    /// Every group in `dead` is freed. On a major collection every other
    /// registered group missing from `live` is freed as well. A freed pinned
    /// pool is replaced by a fresh one-unit pinned group, and generation slots
    /// whose pool was freed are cleared so their next allocation acquires a new
    /// pool. The active generation is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidLivenessReference`] if either set names a
    /// group that is not registered; nothing is modified in that case.
    /// Returns [`HeapError::ProviderExhausted`] if the pinned pool has to be
    /// replaced and the provider has no room.
    pub fn handle_liveness(
        &mut self,
        live: &HashSet<MegaGroup>,
        dead: &HashSet<MegaGroup>,
        collection_type: CollectionType,
    ) -> Result<ReconcileStats, HeapError> {
        let _span = trace_reconcile(collection_type, next_cycle_id());

        if let Some(&group) = live
            .iter()
            .chain(dead.iter())
            .find(|group| !self.mgroups.contains(*group))
        {
            log_invalid_reference(group);
            return Err(HeapError::InvalidLivenessReference { group });
        }

        let mut stats = ReconcileStats {
            collection_type,
            ..ReconcileStats::default()
        };

        for &group in dead {
            stats.units_released += self.free_mega_group(group);
            stats.dead_freed += 1;
        }

        if collection_type.is_major() {
            let unreferenced: Vec<MegaGroup> = self
                .mgroups
                .iter()
                .copied()
                .filter(|group| !live.contains(group))
                .collect();
            for group in unreferenced {
                stats.units_released += self.free_mega_group(group);
                stats.unreferenced_freed += 1;
            }
        }

        for slot in &mut self.generations {
            if slot.is_some_and(|pool| !self.mgroups.contains(&pool)) {
                *slot = None;
                stats.generations_cleared += 1;
            }
        }

        // No pool may point at released units, even if the replacement fails.
        if !self.mgroups.contains(&self.current_pinned) {
            self.current_pinned = MegaGroup::NULL;
            self.current_pinned = self.allocate_mega_group(1, true, self.gen_no)?;
            stats.pinned_pool_replaced = true;
        }

        self.stats.collections += 1;
        self.stats.last_reconcile = Some(stats);
        log_reconcile_end(&stats, self.live_size());
        Ok(stats)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Total units across all registered groups.
    #[must_use]
    pub fn live_size(&self) -> usize {
        self.mgroups
            .iter()
            .map(|&group| load_units(&self.memory, group))
            .sum()
    }

    /// Whether `group` is registered.
    #[must_use]
    pub fn is_registered(&self, group: MegaGroup) -> bool {
        self.mgroups.contains(&group)
    }

    /// Number of registered groups.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.mgroups.len()
    }

    /// Iterate over the registered groups in no particular order.
    pub fn megagroups(&self) -> impl Iterator<Item = MegaGroup> + '_ {
        self.mgroups.iter().copied()
    }

    /// Snapshot of a registered group's descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::UnknownMegaGroup`] if `group` is not registered
    /// and [`HeapError::MalformedDescriptor`] if its geometry is corrupt.
    pub fn descriptor(&self, group: MegaGroup) -> Result<BlockDescriptor, HeapError> {
        if !self.mgroups.contains(&group) {
            return Err(HeapError::UnknownMegaGroup { group });
        }
        let bd = BlockDescriptor::load(&self.memory, group);
        bd.validate(group)?;
        Ok(bd)
    }

    /// Cumulative allocator statistics.
    #[must_use]
    pub const fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// The configuration the allocator was built with.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The memory provider, for reading heap contents.
    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    /// Mutable access to the memory provider, for writing object contents
    /// into allocated space.
    ///
    /// Descriptors must only be changed through the allocator.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }
}
