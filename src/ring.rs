use md5::{Digest, Md5};

/// Default number of slots on the ring.
pub const DEFAULT_SLOTS: u64 = 512;

/// Number of virtual replicas placed on the ring per backend node.
pub const REPLICAS: usize = 9;

/// A consistent hash ring over a fixed-modulus integer keyspace.
///
/// Each backend node is represented by [`REPLICAS`] virtual replicas spread
/// across the `[0, slots)` keyspace, which keeps key movement small when
/// nodes join or leave. Lookups and mutations are all O(ring size), so the
/// structure is meant to sit behind a single coarse lock.
pub struct HashRing {
    /// Ring modulus. Immutable after construction; must be non-zero.
    slots: u64,

    /// Virtual replicas as `(slot, node)` pairs, sorted ascending by slot.
    /// Colliding slots are allowed and kept in insertion order.
    ring: Vec<(u64, String)>,
}

impl HashRing {
    /// Create an empty ring with the given number of slots.
    pub fn new(slots: u64) -> Self {
        debug_assert!(slots > 0, "ring must have at least one slot");
        HashRing { slots, ring: Vec::new() }
    }

    /// Create a ring pre-populated with the given nodes.
    pub fn with_nodes<I, S>(slots: u64, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = HashRing::new(slots);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// Ring modulus.
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Total number of virtual replicas currently on the ring.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Whether any replica of `node` is on the ring.
    pub fn contains(&self, node: &str) -> bool {
        self.ring.iter().any(|(_, n)| n == node)
    }

    /// Distinct nodes on the ring, sorted by name.
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.ring.iter().map(|(_, n)| n.clone()).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Add a node to the ring by inserting its virtual replicas.
    ///
    /// Adding the same node twice inserts another full set of replicas; the
    /// ring does not deduplicate. Callers that need idempotence must check
    /// [`HashRing::contains`] first.
    pub fn add_node(&mut self, node: impl Into<String>) {
        let node = node.into();
        for replica in 0..REPLICAS {
            let slot = self.replica_slot(&node, replica);
            self.ring.push((slot, node.clone()));
        }
        // Stable sort: replicas colliding on a slot keep insertion order.
        self.ring.sort_by_key(|&(slot, _)| slot);
    }

    /// Remove every replica of `node` from the ring.
    ///
    /// Removing a node that was never added is a no-op. Removal preserves
    /// the sorted order of the surviving entries.
    pub fn remove_node(&mut self, node: &str) {
        self.ring.retain(|(_, n)| n != node);
    }

    /// Resolve a pre-hashed key to the node that owns it.
    ///
    /// The key is reduced modulo the slot count before comparison, so both
    /// sides of every comparison live in `[0, slots)`. The owner is the node
    /// of the first replica whose slot is >= the reduced key, wrapping to the
    /// first replica on the ring when the key lies past the last slot.
    /// Returns `None` on an empty ring.
    pub fn resolve(&self, key: u64) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let slot = key % self.slots;
        let idx = self.ring.partition_point(|&(s, _)| s < slot);
        let (_, node) = self.ring.get(idx).unwrap_or(&self.ring[0]);
        Some(node.as_str())
    }

    /// Map an arbitrary byte-string key onto the ring.
    ///
    /// Uses the same digest convention as replica placement, so string client
    /// identifiers route deterministically across restarts and processes.
    pub fn key_slot(&self, key: &[u8]) -> u64 {
        (digest128(key) % u128::from(self.slots)) as u64
    }

    /// Slot of one virtual replica of `node`.
    ///
    /// The quadratic term spreads a node's replicas across the ring instead
    /// of clustering them around the node's digest.
    fn replica_slot(&self, node: &str, replica: usize) -> u64 {
        let slots = u128::from(self.slots);
        let base = digest128(node.as_bytes()) % slots;
        let r = replica as u128;
        ((base + r + 2 * r * r + 25) % slots) as u64
    }
}

/// MD5 digest of `bytes` as a big-endian 128-bit integer.
fn digest128(bytes: &[u8]) -> u128 {
    u128::from_be_bytes(Md5::digest(bytes).into())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(DEFAULT_SLOTS);
        for key in [0, 1, 255, 511, 512, u64::MAX] {
            assert_eq!(ring.resolve(key), None);
        }
    }

    #[test]
    fn test_single_node_owns_every_slot() {
        let mut ring = HashRing::new(DEFAULT_SLOTS);
        ring.add_node("server1");

        assert_eq!(ring.len(), REPLICAS);
        for slot in 0..DEFAULT_SLOTS {
            assert_eq!(ring.resolve(slot), Some("server1"));
        }
    }

    #[test]
    fn test_resolve_returns_added_node() {
        let ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1", "server2", "server3"]);
        for slot in 0..DEFAULT_SLOTS {
            let node = ring.resolve(slot).unwrap();
            assert!(["server1", "server2", "server3"].contains(&node));
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1", "server2", "server3"]);
        for key in [0, 7, 100, 511, 99_999] {
            let first = ring.resolve(key).map(str::to_string);
            assert_eq!(ring.resolve(key).map(str::to_string), first);
        }
    }

    #[test]
    fn test_wrap_around() {
        // server2's replicas span slots 45..=181, server3's 151..=287. A key
        // past the last occupied slot wraps to the smallest one, at 45.
        let ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server2", "server3"]);
        assert_eq!(ring.resolve(287), Some("server3"));
        assert_eq!(ring.resolve(300), Some("server2"));
        assert_eq!(ring.resolve(511), Some("server2"));
    }

    #[test]
    fn test_add_inserts_replica_count_entries() {
        let mut ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1"]);
        let before = ring.len();

        ring.add_node("server2");

        assert_eq!(ring.len(), before + REPLICAS);
        assert!(ring.contains("server2"));
    }

    #[test]
    fn test_remove_deletes_every_replica() {
        let mut ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1", "server2"]);

        ring.remove_node("server1");

        assert_eq!(ring.len(), REPLICAS);
        assert!(!ring.contains("server1"));
        for slot in 0..DEFAULT_SLOTS {
            assert_eq!(ring.resolve(slot), Some("server2"));
        }
    }

    #[test]
    fn test_remove_unknown_node_is_noop() {
        let mut ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1"]);

        ring.remove_node("never-added");

        assert_eq!(ring.len(), REPLICAS);
        assert_eq!(ring.nodes(), vec!["server1".to_string()]);
    }

    #[test]
    fn test_duplicate_add_keeps_resolving() {
        let mut ring = HashRing::new(DEFAULT_SLOTS);
        ring.add_node("server1");
        ring.add_node("server1");

        assert_eq!(ring.len(), 2 * REPLICAS);
        for slot in 0..DEFAULT_SLOTS {
            assert_eq!(ring.resolve(slot), Some("server1"));
        }
    }

    #[test]
    fn test_colliding_slots_are_kept() {
        // server3 and server4 both place a replica at slot 287.
        let ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server3", "server4"]);

        assert_eq!(ring.len(), 2 * REPLICAS);
        let owner = ring.resolve(287).unwrap();
        assert!(["server3", "server4"].contains(&owner));
    }

    #[test]
    fn test_home_key_scenario() {
        let mut ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1", "server2", "server3"]);

        let key = ring.key_slot(b"home");
        assert_eq!(key, 1);

        let owner = ring.resolve(key).unwrap().to_string();
        assert_eq!(owner, "server1");

        ring.remove_node(&owner);
        let next = ring.resolve(key).unwrap();
        assert_eq!(next, "server2");
    }

    #[test]
    fn test_rebalance_moves_about_a_quarter_of_keys() {
        let mut rng = StdRng::seed_from_u64(42);
        let keys: Vec<u64> = (0..10_000).map(|_| rng.random()).collect();

        let mut ring = HashRing::with_nodes(DEFAULT_SLOTS, ["server1", "server2", "server3"]);
        let before: Vec<String> = keys
            .iter()
            .map(|&k| ring.resolve(k).unwrap().to_string())
            .collect();

        ring.add_node("server4");
        let moved = keys
            .iter()
            .zip(&before)
            .filter(|(k, old)| ring.resolve(**k).unwrap() != old.as_str())
            .count();

        let fraction = moved as f64 / keys.len() as f64;
        assert!(
            (fraction - 0.25).abs() < 0.05,
            "moved fraction {fraction} not within 5 points of 1/4"
        );
    }
}
