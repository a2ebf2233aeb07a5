//! Consistent hash ring
//!
//! Each instance is represented by `virtual_nodes` points on a 32-bit ring,
//! point `i` of instance `x` sitting at `fnv1a("x:i")`. A key belongs to the
//! instance owning the first point at or after the key's hash, wrapping
//! around past the largest point.

use parking_lot::RwLock;
use tracing::{debug, warn};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Default)]
struct RingState {
    /// Sorted by (hash, instance)
    points: Vec<(u32, String)>,
    instances: Vec<String>,
}

/// Request router mapping call ids to cluster instances
#[derive(Debug)]
pub struct HashRing {
    virtual_nodes: usize,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes,
            state: RwLock::new(RingState::default()),
        }
    }

    /// Ring populated with `instances`
    pub fn with_instances<I, S>(virtual_nodes: usize, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ring = Self::new(virtual_nodes);
        for instance in instances {
            ring.add(instance);
        }
        ring
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Register an instance. Adding a registered instance again is a no-op.
    pub fn add(&self, instance: impl Into<String>) {
        let instance = instance.into();
        let mut state = self.state.write();
        if state.instances.contains(&instance) {
            warn!("Instance {} already on the ring", instance);
            return;
        }

        for i in 0..self.virtual_nodes {
            let hash = fnv1a_32(format!("{}:{}", instance, i).as_bytes());
            state.points.push((hash, instance.clone()));
        }
        state.points.sort_unstable();
        state.instances.push(instance.clone());
        debug!("Added instance {} ({} points on ring)", instance, state.points.len());
    }

    /// Drop exactly the points of `instance`
    pub fn remove(&self, instance: &str) -> bool {
        let mut state = self.state.write();
        let before = state.instances.len();
        state.instances.retain(|i| i != instance);
        if state.instances.len() == before {
            return false;
        }
        state.points.retain(|(_, owner)| owner != instance);
        debug!("Removed instance {} ({} points on ring)", instance, state.points.len());
        true
    }

    /// Owner of `key`, or `None` when the ring is empty
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.points.is_empty() {
            return None;
        }

        let hash = fnv1a_32(key.as_bytes());
        let idx = state.points.partition_point(|(point, _)| *point < hash);
        let (_, owner) = state.points.get(idx).unwrap_or(&state.points[0]);
        Some(owner.clone())
    }

    /// Registered instances in insertion order
    pub fn instances(&self) -> Vec<String> {
        self.state.read().instances.clone()
    }

    /// Number of points on the ring
    pub fn len(&self) -> usize {
        self.state.read().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("call-{}@example.com", i)).collect()
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = HashRing::new(100);
        assert_eq!(ring.get("call-1"), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_points_per_instance() {
        let ring = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);
        assert_eq!(ring.len(), 300);

        ring.add("instance2");
        assert_eq!(ring.len(), 300);
        assert_eq!(ring.instances(), vec!["instance1", "instance2", "instance3"]);
    }

    #[test]
    fn test_points_stay_sorted() {
        let ring = HashRing::with_instances(50, ["a", "b", "c"]);
        let state = ring.state.read();
        assert!(state.points.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_every_instance_owns_some_keys() {
        let ring = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);
        let owners: std::collections::HashSet<String> =
            keys(1000).iter().filter_map(|k| ring.get(k)).collect();
        assert_eq!(owners.len(), 3);
    }

    #[test]
    fn test_wrap_around_goes_to_first_point() {
        let ring = HashRing::with_instances(10, ["a", "b"]);
        let first_owner = ring.state.read().points[0].1.clone();
        // Find a key hashing above every point
        let last_point = ring.state.read().points.last().map(|(h, _)| *h).unwrap();
        let key = (0..)
            .map(|i| format!("wrap-{}", i))
            .find(|k| fnv1a_32(k.as_bytes()) > last_point)
            .unwrap();
        assert_eq!(ring.get(&key), Some(first_owner));
    }

    #[test]
    fn test_minimal_disruption_on_add() {
        let ring = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);
        let keys = keys(10_000);
        let before: Vec<String> = keys.iter().map(|k| ring.get(k).unwrap()).collect();

        ring.add("instance4");

        let mut moved = 0;
        for (key, old) in keys.iter().zip(&before) {
            let new = ring.get(key).unwrap();
            if &new != old {
                // Keys only ever move to the new instance
                assert_eq!(new, "instance4");
                moved += 1;
            }
        }
        // Expectation is 1/4 of the keys
        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.15 && fraction < 0.35, "moved fraction {}", fraction);
    }

    #[test]
    fn test_remove_restores_previous_mapping() {
        let ring = HashRing::with_instances(100, ["instance1", "instance2"]);
        let keys = keys(500);
        let before: Vec<Option<String>> = keys.iter().map(|k| ring.get(k)).collect();

        ring.add("instance3");
        assert!(ring.remove("instance3"));
        assert!(!ring.remove("instance3"));
        assert_eq!(ring.len(), 200);

        let after: Vec<Option<String>> = keys.iter().map(|k| ring.get(k)).collect();
        assert_eq!(before, after);
    }

    proptest! {
        #[test]
        fn prop_lookup_is_deterministic(key in ".*") {
            let ring = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);
            let first = ring.get(&key);
            prop_assert!(first.is_some());
            prop_assert_eq!(ring.get(&key), first.clone());

            let rebuilt = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);
            prop_assert_eq!(rebuilt.get(&key), first);
        }

        #[test]
        fn prop_added_instance_only_takes_keys(key in "[a-z0-9@.-]{1,40}") {
            let ring = HashRing::with_instances(64, ["a", "b", "c"]);
            let before = ring.get(&key);
            ring.add("d");
            let after = ring.get(&key);
            prop_assert!(after == before || after.as_deref() == Some("d"));
        }
    }
}
