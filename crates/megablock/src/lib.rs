//! A block-structured heap allocator for a garbage-collected runtime.
//!
//! `megablock` manages a linear address space in fixed 1 MiB units. Units
//! are grouped into **MegaGroups**, each described by a block descriptor
//! stored in the header of its first unit. Allocation is a bump of the
//! descriptor's free cursor in one of several pools:
//!
//! - one **pinned** pool, for memory the collector must never move, and for
//!   every request of at least one 4 KiB block;
//! - one **unpinned** pool per generation, selected with
//!   [`HeapAllocator::set_generation_no`].
//!
//! After each collection the collector hands the allocator its live and dead
//! sets through [`HeapAllocator::handle_liveness`], which frees dead groups,
//! sweeps unreferenced ones on major collections, and repairs the pools.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::collections::HashSet;
//! use megablock::{CollectionType, HeapAllocator, HeapConfig};
//!
//! let mut heap = HeapAllocator::new(HeapConfig::default())?;
//! let obj = heap.allocate(4, false)?;
//! let buf = heap.allocate_pinned(1024)?;
//!
//! // After a major collection that found only the pinned pool alive:
//! let live: HashSet<_> = [heap.current_pinned()].into_iter().collect();
//! let stats = heap.handle_liveness(&live, &HashSet::new(), CollectionType::Major)?;
//! assert_eq!(stats.unreferenced_freed, 1);
//! # let _ = (obj, buf);
//! # Ok::<(), megablock::HeapError>(())
//! ```
//!
//! # Error policy
//!
//! Every error is fatal to the runtime: a provider that cannot grow, or a
//! collector whose view of the heap disagrees with the registry, leaves no
//! safe way to continue. The allocator reports these as [`HeapError`] and
//! performs no retries; the embedder decides how to abort.
//!
//! # Thread Safety
//!
//! The allocator is single-threaded and takes `&mut self` for every mutation.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod heap;
mod metrics;
mod tracing;

pub mod layout;
pub mod memory;

pub use config::HeapConfig;
pub use error::HeapError;
pub use heap::HeapAllocator;
pub use layout::{size_for_bytes, Address, BlockDescriptor, MegaGroup};
pub use memory::{LinearMemory, MemoryProvider};
pub use metrics::{CollectionType, HeapStats, ReconcileStats};
