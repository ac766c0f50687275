//! Ring identifier space: node/key ids, hashing, and circular range tests.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Position on the identifier ring. The ring is the full `u128` space
/// (2^128 ids); an id is the entire MD5 digest of the hashed text, so the
/// hash output width and the ring id width are equal by construction.
pub type NodeId = u128;

/// Number of bits in a ring id; also the number of finger table entries.
pub const HASH_BITS: usize = 128;

/// Hashes arbitrary text onto the ring.
pub fn key_for(text: &str) -> NodeId {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let digest: [u8; 16] = hasher.finalize().into();
    u128::from_be_bytes(digest)
}

/// Hashes a node's address onto the ring.
pub fn node_id_for(host: &str, port: u16) -> NodeId {
    key_for(&format!("{}:{}", host, port))
}

/// Short printable form of a ring id (first 8 hex digits).
pub fn short_id(id: NodeId) -> String {
    format!("{:032x}", id)[..8].to_string()
}

/// Serde representation of a ring id as its 16 big-endian bytes, for wire
/// blobs (MessagePack has no native 128-bit integer).
pub mod id_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        id: &u128,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        id.to_be_bytes().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<u128, D::Error> {
        let bytes = <[u8; 16]>::deserialize(deserializer)?;
        Ok(u128::from_be_bytes(bytes))
    }
}

/// Half-open circular interval membership test: true iff walking clockwise
/// from `start` reaches `value` strictly before wrapping past `end`. With
/// `start == end` the interval covers the whole ring and the test is always
/// true; the non-wrapping case reduces to `start <= value < end`.
pub fn circular_range(value: NodeId, start: NodeId, end: NodeId) -> bool {
    use std::cmp::Ordering;
    match start.cmp(&end) {
        Ordering::Less => start <= value && value < end,
        Ordering::Equal => true,
        Ordering::Greater => value >= start || value < end,
    }
}

/// Membership in `(after, upto]` on the ring; `(a, a]` covers the whole
/// ring, which is what makes a singleton node own every key.
pub fn in_open_closed(value: NodeId, after: NodeId, upto: NodeId) -> bool {
    circular_range(value, after.wrapping_add(1), upto.wrapping_add(1))
}

/// Membership in `(after, before)` on the ring, exclusive on both ends.
pub fn in_open_open(value: NodeId, after: NodeId, before: NodeId) -> bool {
    let start = after.wrapping_add(1);
    if start == before {
        // adjacent ids leave nothing strictly between them
        return false;
    }
    circular_range(value, start, before)
}

/// An addressable peer on the ring: a plain value triple, may denote self.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Ring position, hashed from `host` and `port`.
    #[serde(with = "id_bytes")]
    pub id: NodeId,

    /// Reachable hostname or IP address.
    pub host: String,

    /// TCP port the node's listener is bound to.
    pub port: u16,
}

impl NodeInfo {
    /// Composes the info for a node address, hashing its ring id.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        NodeInfo {
            id: node_id_for(&host, port),
            host,
            port,
        }
    }

    /// Composes info carrying an externally supplied id (wire `notify`).
    pub fn with_id(id: NodeId, host: impl Into<String>, port: u16) -> Self {
        NodeInfo {
            id,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", short_id(self.id), self.host, self.port)
    }
}

#[cfg(test)]
mod ident_tests {
    use super::*;

    #[test]
    fn range_non_wrapping() {
        assert!(circular_range(3, 2, 5));
        assert!(circular_range(2, 2, 5));
        assert!(!circular_range(5, 2, 5));
        assert!(!circular_range(1, 2, 5));
        assert!(!circular_range(7, 2, 5));
    }

    #[test]
    fn range_wrapping() {
        // walking clockwise from 6 wraps past 0 before reaching 2
        assert!(circular_range(7, 6, 2));
        assert!(circular_range(0, 6, 2));
        assert!(circular_range(1, 6, 2));
        assert!(!circular_range(2, 6, 2));
        assert!(!circular_range(5, 6, 2));
        assert!(circular_range(u128::MAX, 6, 2));
    }

    #[test]
    fn range_whole_ring() {
        // equal endpoints cover the entire ring
        assert!(circular_range(0, 4, 4));
        assert!(circular_range(4, 4, 4));
        assert!(circular_range(u128::MAX, 4, 4));
    }

    #[test]
    fn open_closed_interval() {
        // toy ring from the 3-bit scenario: nodes at 1, 3, 6
        assert!(in_open_closed(4, 3, 6)); // key 4 sits in (3, 6]
        assert!(in_open_closed(6, 3, 6));
        assert!(!in_open_closed(3, 3, 6));
        assert!(in_open_closed(0, 6, 1)); // wraps past the ring boundary
        assert!(in_open_closed(1, 6, 1));
        assert!(!in_open_closed(6, 6, 1));
        // singleton node owns every key
        assert!(in_open_closed(0, 5, 5));
        assert!(in_open_closed(5, 5, 5));
    }

    #[test]
    fn open_open_interval() {
        assert!(in_open_open(4, 3, 6));
        assert!(!in_open_open(6, 3, 6));
        assert!(!in_open_open(3, 3, 6));
        // adjacent ids bound an empty interval
        assert!(!in_open_open(9, 3, 4));
        // (a, a) is everything but a itself
        assert!(in_open_open(0, 5, 5));
        assert!(!in_open_open(5, 5, 5));
    }

    #[test]
    fn node_id_deterministic() {
        let a = node_id_for("127.0.0.1", 8000);
        let b = node_id_for("127.0.0.1", 8000);
        assert_eq!(a, b);
        assert_ne!(a, node_id_for("127.0.0.1", 8001));
        assert_ne!(a, node_id_for("10.0.0.7", 8000));
    }

    #[test]
    fn node_info_display() {
        let info = NodeInfo::new("127.0.0.1", 8000);
        let shown = format!("{}", info);
        assert!(shown.ends_with("@127.0.0.1:8000"));
        assert_eq!(shown.find('@'), Some(8));
    }

    #[test]
    fn id_bytes_roundtrip() {
        let info = NodeInfo::new("localhost", 9120);
        let bytes = rmp_serde::to_vec(&info).unwrap();
        let back: NodeInfo = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, info);
    }
}
