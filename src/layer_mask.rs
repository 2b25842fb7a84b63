//! # Layer Masks
//!
//! Audio layer filtering. Geometry components and probes both carry a mask;
//! tracing and probe invalidation only consider entries whose masks intersect.

use bitflags::bitflags;

bitflags! {
    /// Bit mask selecting audio layers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerMask: u64 {
        /// No layers
        const NONE = 0;
        /// All layers
        const ALL = u64::MAX;
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl LayerMask {
    /// Mask with a single layer bit set
    pub fn layer(index: u32) -> Self {
        debug_assert!(index < 64);
        Self::from_bits_retain(1u64 << index)
    }

    /// True if the masks share at least one layer
    #[inline]
    pub fn matches(&self, other: LayerMask) -> bool {
        self.intersects(other)
    }
}
