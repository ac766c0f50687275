//! The mutable ring state block shared by the serving path and the
//! maintenance loops. Guarded by one coarse `tokio::sync::Mutex` at the
//! node level; guards are released before any outbound peer call.

use crate::ring::finger::FingerTable;
use crate::ring::ident::{in_open_closed, NodeId, NodeInfo};
use crate::ring::store::{ChordKey, DataStore};

/// Everything a node mutates while routing, serving, and stabilizing.
#[derive(Debug)]
pub struct RingState {
    /// Routing shortcuts, `HASH_BITS` entries.
    pub finger_table: FingerTable,

    /// The nearest live clockwise nodes; index 0 is the authoritative
    /// current successor. Fixed length; evictions backfill with self
    /// placeholders until stabilize repopulates.
    pub successor_list: Vec<NodeInfo>,

    /// Current predecessor; starts as self, updated only via notify.
    pub predecessor: NodeInfo,

    /// Node-local slice of the keyspace.
    pub store: DataStore,
}

impl RingState {
    /// Fresh state for a node not yet part of any ring: every pointer is
    /// the node itself.
    pub fn new(me: &NodeInfo, successor_list_size: usize) -> Self {
        RingState {
            finger_table: FingerTable::new(me),
            successor_list: vec![me.clone(); successor_list_size],
            predecessor: me.clone(),
            store: DataStore::new(),
        }
    }

    /// The authoritative current successor.
    pub fn successor(&self) -> NodeInfo {
        self.successor_list[0].clone()
    }

    /// Whether `chord_key` falls in this node's storage range
    /// `(me.id, successor.id]`; a singleton ring owns every key.
    pub fn owns(&self, me: &NodeInfo, chord_key: ChordKey) -> bool {
        in_open_closed(chord_key, me.id, self.successor_list[0].id)
    }

    /// Points every finger, successor entry, and the predecessor back at
    /// the node itself (network bootstrap).
    pub fn reset_to_self(&mut self, me: &NodeInfo) {
        self.finger_table.reset_to(me);
        for entry in self.successor_list.iter_mut() {
            *entry = me.clone();
        }
        self.predecessor = me.clone();
    }

    /// Drops a failed node from the successor list, padding the tail with
    /// self placeholders to keep the list length fixed.
    pub fn evict_successor(&mut self, failed: NodeId, me: &NodeInfo) {
        let size = self.successor_list.len();
        self.successor_list.retain(|info| info.id != failed);
        while self.successor_list.len() < size {
            self.successor_list.push(me.clone());
        }
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    fn toy_node(id: u128) -> NodeInfo {
        NodeInfo::with_id(id, "127.0.0.1", 7100 + (id % 1000) as u16)
    }

    #[test]
    fn fresh_state_points_at_self() {
        let me = toy_node(6);
        let state = RingState::new(&me, 3);
        assert_eq!(state.successor().id, 6);
        assert_eq!(state.predecessor.id, 6);
        assert_eq!(state.successor_list.len(), 3);
        assert!(state.store.is_empty());
    }

    #[test]
    fn ownership_follows_successor() {
        let me = toy_node(3);
        let mut state = RingState::new(&me, 3);
        // singleton ring: everything is ours
        assert!(state.owns(&me, 0));
        assert!(state.owns(&me, 200));
        // with successor 6, we hold exactly (3, 6]
        state.successor_list[0] = toy_node(6);
        assert!(state.owns(&me, 4));
        assert!(state.owns(&me, 6));
        assert!(!state.owns(&me, 3));
        assert!(!state.owns(&me, 7));
    }

    #[test]
    fn evict_pads_with_self() {
        let me = toy_node(1);
        let mut state = RingState::new(&me, 3);
        state.successor_list = vec![toy_node(3), toy_node(6), toy_node(9)];
        state.evict_successor(6, &me);
        let ids: Vec<u128> =
            state.successor_list.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 9, 1]);
    }
}
