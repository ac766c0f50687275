//! Ring core data structures: identifier space, finger table, successor
//! list, and the node-local data store.

mod finger;
mod ident;
mod state;
mod store;

pub use finger::{FingerEntry, FingerTable};
pub use ident::{
    circular_range, in_open_closed, in_open_open, key_for, node_id_for,
    short_id, NodeId, NodeInfo, HASH_BITS,
};
pub use state::RingState;
pub use store::{Bucket, ChordKey, DataKey, DataStore, Value};
