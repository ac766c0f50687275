//! Carillon is a Chord-style distributed hash table: nodes form a ring
//! over a 128-bit consistent-hashing identifier space, route lookups in
//! logarithmic hops through finger tables, and tolerate churn through
//! successor lists and periodic stabilization. Peers and external clients
//! speak the same plain-text command protocol over short-lived TCP
//! connections, with structured payloads carried as MessagePack blobs.

#[macro_use]
mod utils;

pub mod dataset;
pub mod net;
pub mod node;
pub mod ring;

pub use utils::{logger_init, CarillonError, ME};

pub use node::{ChordConfig, ChordNode, FingerUpdateMode};
pub use ring::{
    circular_range, key_for, node_id_for, short_id, ChordKey, DataKey,
    NodeId, NodeInfo, Value, HASH_BITS,
};
