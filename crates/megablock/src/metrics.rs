//! Allocator statistics.

/// Kind of collection cycle being reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CollectionType {
    /// A minor collection (young generation only). Only explicitly dead
    /// groups are freed.
    #[default]
    Minor = 1,
    /// A major collection (full heap). Every group missing from the live set
    /// is freed as well.
    Major = 2,
}

impl CollectionType {
    /// Whether this collection authorizes the whole-registry sweep.
    #[must_use]
    pub const fn is_major(self) -> bool {
        matches!(self, Self::Major)
    }

    /// Lowercase name, used for tracing fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
        }
    }
}

impl From<bool> for CollectionType {
    fn from(is_major: bool) -> Self {
        if is_major {
            Self::Major
        } else {
            Self::Minor
        }
    }
}

/// Outcome of one post-collection reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Type of collection reconciled.
    pub collection_type: CollectionType,
    /// Groups freed because the collector listed them as dead.
    pub dead_freed: usize,
    /// Groups freed by the major-collection sweep.
    pub unreferenced_freed: usize,
    /// Units returned to the memory provider.
    pub units_released: usize,
    /// Whether the pinned pool was freed and replaced.
    pub pinned_pool_replaced: bool,
    /// Generation slots whose pool was freed and cleared.
    pub generations_cleared: usize,
}

impl ReconcileStats {
    /// Total groups freed by the cycle.
    #[must_use]
    pub const fn groups_freed(&self) -> usize {
        self.dead_freed + self.unreferenced_freed
    }
}

/// Cumulative counters since the allocator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful allocation requests.
    pub allocations: usize,
    /// Bytes handed out by allocation requests.
    pub bytes_allocated: usize,
    /// Allocations that had to acquire a fresh pool.
    pub pool_refills: usize,
    /// MegaGroups acquired from the provider.
    pub groups_acquired: usize,
    /// MegaGroups freed back to the provider.
    pub groups_released: usize,
    /// Units acquired from the provider.
    pub units_acquired: usize,
    /// Units returned to the provider.
    pub units_released: usize,
    /// Reconciliations performed.
    pub collections: usize,
    /// Result of the most recent reconciliation.
    pub last_reconcile: Option<ReconcileStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_type_from_flag() {
        assert_eq!(CollectionType::from(true), CollectionType::Major);
        assert_eq!(CollectionType::from(false), CollectionType::Minor);
        assert!(CollectionType::Major.is_major());
        assert!(!CollectionType::Minor.is_major());
        assert_eq!(CollectionType::Major.as_str(), "major");
    }

    #[test]
    fn test_groups_freed_sums_both_phases() {
        let stats = ReconcileStats {
            dead_freed: 2,
            unreferenced_freed: 3,
            ..ReconcileStats::default()
        };
        assert_eq!(stats.groups_freed(), 5);
    }
}
