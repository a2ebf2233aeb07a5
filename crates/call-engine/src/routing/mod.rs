//! # Call Routing
//!
//! Decides which cluster instance owns a call. Ownership is advisory: it is a
//! pure function of the call id and the ring membership, with no coordination
//! between instances.

pub mod hash_ring;

pub use hash_ring::{fnv1a_32, HashRing};
