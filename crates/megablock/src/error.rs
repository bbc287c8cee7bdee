//! Heap allocator errors.
//!
//! Every variant is fatal for the embedding runtime. The allocator never
//! retries and never recovers partially; callers decide how to abort.

use std::fmt;
use std::io;

use crate::layout::MegaGroup;

/// Errors reported by the heap allocator and its memory provider.
#[derive(Debug)]
pub enum HeapError {
    /// The memory provider could not supply `requested` contiguous units.
    ProviderExhausted {
        /// Number of units requested.
        requested: usize,
    },
    /// A live or dead set passed to reconciliation named a group that is not
    /// registered with the allocator.
    InvalidLivenessReference {
        /// The offending descriptor handle.
        group: MegaGroup,
    },
    /// A generation index outside the configured generation table.
    InvalidGeneration {
        /// Requested generation.
        gen: usize,
        /// Number of configured generations.
        generations: usize,
    },
    /// A descriptor lookup for a group the allocator does not own.
    UnknownMegaGroup {
        /// The offending descriptor handle.
        group: MegaGroup,
    },
    /// A descriptor whose geometry violates `start <= free <= limit` or has
    /// no units.
    MalformedDescriptor {
        /// The offending descriptor handle.
        group: MegaGroup,
    },
    /// A rejected [`HeapConfig`](crate::HeapConfig).
    InvalidConfig(&'static str),
    /// The operating system refused an address-space operation.
    Os(io::Error),
}

impl HeapError {
    /// The MegaGroup the error names, if any.
    #[must_use]
    pub const fn group(&self) -> Option<MegaGroup> {
        match self {
            Self::InvalidLivenessReference { group }
            | Self::UnknownMegaGroup { group }
            | Self::MalformedDescriptor { group } => Some(*group),
            _ => None,
        }
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderExhausted { requested } => {
                write!(f, "memory provider exhausted: cannot acquire {requested} units")
            }
            Self::InvalidLivenessReference { group } => {
                write!(f, "liveness set references unregistered MegaGroup {group}")
            }
            Self::InvalidGeneration { gen, generations } => {
                write!(f, "generation {gen} out of range (have {generations})")
            }
            Self::UnknownMegaGroup { group } => write!(f, "unknown MegaGroup {group}"),
            Self::MalformedDescriptor { group } => {
                write!(f, "malformed block descriptor at {group}")
            }
            Self::InvalidConfig(reason) => write!(f, "invalid heap config: {reason}"),
            Self::Os(err) => write!(f, "address space operation failed: {err}"),
        }
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Os(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for HeapError {
    fn from(err: io::Error) -> Self {
        Self::Os(err)
    }
}
