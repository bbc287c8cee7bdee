//! Heap allocator configuration.

use crate::error::HeapError;

/// Configuration for a [`HeapAllocator`](crate::HeapAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Number of generations, each with its own unpinned pool.
    pub generations: usize,
    /// Units of address space reserved by the default provider, including
    /// the null unit.
    pub max_units: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            generations: 2,
            max_units: 4096,
        }
    }
}

impl HeapConfig {
    /// Set the number of generations.
    #[must_use]
    pub const fn generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    /// Set the size of the default provider's reservation, in units.
    #[must_use]
    pub const fn max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    /// Reject configurations the allocator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] for zero generations, more
    /// generations than a descriptor's `gen_no` can record, or a reservation
    /// with no usable unit.
    pub fn validate(&self) -> Result<(), HeapError> {
        if self.generations == 0 {
            return Err(HeapError::InvalidConfig("at least one generation is required"));
        }
        if self.generations > u16::MAX as usize {
            return Err(HeapError::InvalidConfig("generation count exceeds gen_no width"));
        }
        if self.max_units < 2 {
            return Err(HeapError::InvalidConfig("max_units must be at least 2"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_two_generations() {
        let config = HeapConfig::default();
        assert_eq!(config.generations, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        assert!(HeapConfig::default().generations(0).validate().is_err());
        assert!(HeapConfig::default().max_units(1).validate().is_err());
        let config = HeapConfig::default().generations(3).max_units(64);
        assert_eq!(config.generations, 3);
        assert_eq!(config.max_units, 64);
        assert!(config.validate().is_ok());
    }
}
