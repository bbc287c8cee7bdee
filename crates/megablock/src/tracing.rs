//! Heap tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for MegaGroup traffic and reconciliation. Without
//! the feature every hook is a no-op.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::layout::MegaGroup;
    use crate::metrics::{CollectionType, ReconcileStats};

    /// Stable identifier for a reconciliation cycle.
    ///
    /// Monotonically increasing, starting at 1; used to correlate every event
    /// emitted while one cycle is reconciled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CycleId(pub u64);

    static NEXT_CYCLE_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique cycle ID.
    pub fn next_cycle_id() -> CycleId {
        CycleId(NEXT_CYCLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering one `handle_liveness` call.
    pub fn trace_reconcile(collection_type: CollectionType, id: CycleId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "handle_liveness",
            collection_type = collection_type.as_str(),
            cycle_id = id.0
        )
        .entered()
    }

    pub fn log_group_acquired(group: MegaGroup, units: usize, pinned: bool, gen_no: u16) {
        tracing::debug!(group = %group, units, pinned, gen_no, "mgroup_acquired");
    }

    pub fn log_group_released(group: MegaGroup, units: usize) {
        tracing::debug!(group = %group, units, "mgroup_released");
    }

    pub fn log_pool_refill(pinned: bool, gen_no: usize, bytes: usize) {
        tracing::debug!(pinned, gen_no, bytes, "pool_refill");
    }

    pub fn log_reconcile_end(stats: &ReconcileStats, live_units: usize) {
        tracing::debug!(
            dead_freed = stats.dead_freed,
            unreferenced_freed = stats.unreferenced_freed,
            units_released = stats.units_released,
            pinned_pool_replaced = stats.pinned_pool_replaced,
            generations_cleared = stats.generations_cleared,
            live_units,
            "reconcile_end"
        );
    }

    pub fn log_invalid_reference(group: MegaGroup) {
        tracing::error!(group = %group, "liveness set references unregistered MegaGroup");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub mod internal {
    use crate::layout::MegaGroup;
    use crate::metrics::{CollectionType, ReconcileStats};

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CycleId(pub u64);

    /// Stub function when tracing is disabled.
    pub fn next_cycle_id() -> CycleId {
        CycleId(0)
    }

    /// Stand-in for an entered span.
    #[derive(Debug)]
    pub struct NoSpan;

    pub fn trace_reconcile(_collection_type: CollectionType, _id: CycleId) -> NoSpan {
        NoSpan
    }

    pub fn log_group_acquired(_group: MegaGroup, _units: usize, _pinned: bool, _gen_no: u16) {}

    pub fn log_group_released(_group: MegaGroup, _units: usize) {}

    pub fn log_pool_refill(_pinned: bool, _gen_no: usize, _bytes: usize) {}

    pub fn log_reconcile_end(_stats: &ReconcileStats, _live_units: usize) {}

    pub fn log_invalid_reference(_group: MegaGroup) {}
}
