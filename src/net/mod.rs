//! Transport layer: wire framing and outbound peer exchanges.

pub mod client;
pub mod wire;
