//! Neighbor cache: `(virtual_address, in_if) → physical_address` (spec §3).
//!
//! Small, flat, newest-observation-wins map — same shape as
//! `rist_bonding_core::net::state`'s per-link registries, collapsed to a
//! single `HashMap` since lookups never need to scan.

use crate::types::{LQSRIf, PhysicalAddress, VirtualAddress};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NeighborKey {
    virtual_address: VirtualAddress,
    in_if: LQSRIf,
}

/// Maps a neighbor's virtual address, observed on a given local interface,
/// to the physical address frames to it should be addressed to.
#[derive(Debug, Default)]
pub struct NeighborCache {
    entries: HashMap<NeighborKey, PhysicalAddress>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or overwrites the physical address for `(virtual_address,
    /// in_if)`. Newer observations always win — there is no staleness check
    /// here, matching spec §3's "mutable; newer observation overwrites".
    pub fn observe(
        &mut self,
        virtual_address: VirtualAddress,
        in_if: LQSRIf,
        physical_address: PhysicalAddress,
    ) {
        self.entries.insert(
            NeighborKey {
                virtual_address,
                in_if,
            },
            physical_address,
        );
    }

    pub fn lookup(
        &self,
        virtual_address: VirtualAddress,
        in_if: LQSRIf,
    ) -> Option<PhysicalAddress> {
        self.entries
            .get(&NeighborKey {
                virtual_address,
                in_if,
            })
            .copied()
    }

    pub fn remove(&mut self, virtual_address: VirtualAddress, in_if: LQSRIf) {
        self.entries.remove(&NeighborKey {
            virtual_address,
            in_if,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `IOCTL_MCL_FLUSH_NEIGHBOR_CACHE`: drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// `IOCTL_MCL_QUERY_NEIGHBOR_CACHE`: every known `(virtual_address, in_if)`.
    pub fn iter(&self) -> impl Iterator<Item = (VirtualAddress, LQSRIf)> + '_ {
        self.entries.keys().map(|k| (k.virtual_address, k.in_if))
    }
}
