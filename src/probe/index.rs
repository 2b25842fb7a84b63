//! # Probe Spatial Index
//!
//! Flat AABB index over valid probes. Entries hold dense probe keys, never
//! references; removing a probe from the index is what invalidates it.
//! Entries snapshot the probe extents at insert time.

use glam::DVec3;
use slotmap::{new_key_type, SlotMap};

use crate::layer_mask::LayerMask;
use crate::probe::cache::ProbeKey;

new_key_type! {
    /// Key of an index entry, stored back on the probe
    pub struct IndexSlot;
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    probe: ProbeKey,
    min_extend: DVec3,
    max_extend: DVec3,
    layer_mask: LayerMask,
}

/// AABB index of valid probes
#[derive(Debug, Default)]
pub struct ProbeIndex {
    entries: SlotMap<IndexSlot, IndexEntry>,
}

impl ProbeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a probe's box, returning the slot to store on the probe
    pub fn insert(
        &mut self,
        probe: ProbeKey,
        min_extend: DVec3,
        max_extend: DVec3,
        layer_mask: LayerMask,
    ) -> IndexSlot {
        self.entries.insert(IndexEntry {
            probe,
            min_extend,
            max_extend,
            layer_mask,
        })
    }

    /// Remove an entry; missing slots are ignored
    pub fn remove(&mut self, slot: IndexSlot) {
        self.entries.remove(slot);
    }

    /// Drop all entries without touching the probes
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Collect probes whose box overlaps the region and whose layer mask
    /// intersects the given mask
    pub fn query_overlap(
        &self,
        min_extend: DVec3,
        max_extend: DVec3,
        layer_mask: LayerMask,
        mut callback: impl FnMut(ProbeKey),
    ) {
        for entry in self.entries.values() {
            if !entry.layer_mask.matches(layer_mask) {
                continue;
            }
            if entry.min_extend.x > max_extend.x
                || entry.min_extend.y > max_extend.y
                || entry.min_extend.z > max_extend.z
                || entry.max_extend.x < min_extend.x
                || entry.max_extend.y < min_extend.y
                || entry.max_extend.z < min_extend.z
            {
                continue;
            }
            callback(entry.probe);
        }
    }

    /// True if the slot still maps to the given probe
    pub fn contains(&self, slot: IndexSlot, probe: ProbeKey) -> bool {
        self.entries.get(slot).is_some_and(|entry| entry.probe == probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn probe_keys(count: usize) -> Vec<ProbeKey> {
        let mut map: SlotMap<ProbeKey, ()> = SlotMap::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_insert_query_remove() {
        let keys = probe_keys(2);
        let mut index = ProbeIndex::new();

        let slot_a = index.insert(
            keys[0],
            DVec3::new(-5.0, 0.0, -5.0),
            DVec3::new(5.0, 3.0, 5.0),
            LayerMask::ALL,
        );
        index.insert(
            keys[1],
            DVec3::new(20.0, 0.0, 20.0),
            DVec3::new(30.0, 3.0, 30.0),
            LayerMask::ALL,
        );

        let mut found = Vec::new();
        index.query_overlap(
            DVec3::new(-1.0, 0.0, -1.0),
            DVec3::new(1.0, 1.0, 1.0),
            LayerMask::ALL,
            |key| found.push(key),
        );
        assert_eq!(found, vec![keys[0]]);
        assert!(index.contains(slot_a, keys[0]));

        index.remove(slot_a);
        assert_eq!(index.len(), 1);
        assert!(!index.contains(slot_a, keys[0]));
    }

    #[test]
    fn test_layer_mask_filters_query() {
        let keys = probe_keys(1);
        let mut index = ProbeIndex::new();
        index.insert(
            keys[0],
            DVec3::splat(-1.0),
            DVec3::splat(1.0),
            LayerMask::layer(2),
        );

        let mut count = 0;
        index.query_overlap(
            DVec3::splat(-2.0),
            DVec3::splat(2.0),
            LayerMask::layer(3),
            |_| count += 1,
        );
        assert_eq!(count, 0);

        index.query_overlap(
            DVec3::splat(-2.0),
            DVec3::splat(2.0),
            LayerMask::layer(2),
            |_| count += 1,
        );
        assert_eq!(count, 1);
    }
}
