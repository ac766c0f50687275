//! Finger table: the logarithmic-hop routing shortcuts.

use std::fmt;

use crate::ring::ident::{in_open_open, NodeId, NodeInfo, HASH_BITS};

/// One routing shortcut. `start` is the first ring id the entry speaks for;
/// `node` is believed to be the first live node at or after `start`.
#[derive(Debug, Clone)]
pub struct FingerEntry {
    pub start: NodeId,
    pub node: NodeInfo,
}

impl fmt::Display for FingerEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "start: {}, node: {}",
            crate::ring::ident::short_id(self.start),
            self.node
        )
    }
}

/// Ordered table of `HASH_BITS` routing shortcuts. Entry `i` covers the ids
/// from `self.id + 2^i` (wrapping) up to the next entry's start.
#[derive(Debug, Clone)]
pub struct FingerTable {
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    /// Builds the table for a fresh node; every entry points at the node
    /// itself until fix-fingers learns better.
    pub fn new(me: &NodeInfo) -> Self {
        let entries = (0..HASH_BITS)
            .map(|i| FingerEntry {
                start: me.id.wrapping_add(1u128 << i),
                node: me.clone(),
            })
            .collect();
        FingerTable { entries }
    }

    /// Number of entries (always `HASH_BITS`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> &FingerEntry {
        &self.entries[idx]
    }

    /// Start id of entry `idx`.
    pub fn start(&self, idx: usize) -> NodeId {
        self.entries[idx].start
    }

    /// Installs a freshly resolved node for entry `idx`.
    pub fn set_node(&mut self, idx: usize, node: NodeInfo) {
        self.entries[idx].node = node;
    }

    /// Points every entry back at the node itself (bootstrap).
    pub fn reset_to(&mut self, me: &NodeInfo) {
        for entry in self.entries.iter_mut() {
            entry.node = me.clone();
        }
    }

    /// Returns the table entry closest to `id` from below: scans from the
    /// highest index down for the first node strictly inside `(me.id, id)`,
    /// falling back to `me` when no finger precedes `id`.
    pub fn closest_preceding(&self, me: &NodeInfo, id: NodeId) -> NodeInfo {
        for entry in self.entries.iter().rev() {
            if in_open_open(entry.node.id, me.id, id) {
                return entry.node.clone();
            }
        }
        me.clone()
    }

    /// Drops an unreachable node from the table: each matching entry is
    /// replaced by the preceding entry's node, or by `me` at index 0.
    pub fn evict(&mut self, failed: NodeId, me: &NodeInfo) {
        for i in 0..self.entries.len() {
            if self.entries[i].node.id == failed {
                self.entries[i].node = if i > 0 {
                    // ascending order, so a matching predecessor entry has
                    // already been substituted
                    self.entries[i - 1].node.clone()
                } else {
                    me.clone()
                };
            }
        }
    }
}
