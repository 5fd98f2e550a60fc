// Deterministic key -> partition id mapping.
//
// Grounded on the teacher's `dht.rs` hash-ring-position idea, simplified
// from a full consistent-hash ring (the partition count here is fixed, not
// elastic) to a single modulo step over a caller-supplied signed hash.

/// Maps a signed key hash into `[0, partition_count)`. Two keys whose
/// `partition_hash` is equal always map to the same partition for a given
/// `partition_count`, on every node and at every point in time.
pub fn hash_to_index(partition_hash: i32, partition_count: usize) -> usize {
    debug_assert!(partition_count > 0, "partition_count must be positive");
    // `rem_euclid` turns the signed hash into a non-negative remainder
    // without the double-mod dance `((x % n) + n) % n` needs for i32::MIN.
    (partition_hash as i64).rem_euclid(partition_count as i64) as usize
}

/// Anything that can report a stable, pre-computed partition hash - the
/// consumer-facing equivalent of a key already run through the node's
/// hashing function.
pub trait PartitionHashed {
    fn partition_hash(&self) -> i32;
}

impl PartitionHashed for i32 {
    fn partition_hash(&self) -> i32 {
        *self
    }
}

impl PartitionHashed for &str {
    fn partition_hash(&self) -> i32 {
        let mut hash: i32 = 0;
        for byte in self.as_bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(*byte as i32);
        }
        hash
    }
}

/// `getPartitionId(key)`: resolve a key's partition id for a table of
/// `partition_count` partitions.
pub fn partition_id_for<K: PartitionHashed>(key: &K, partition_count: usize) -> usize {
    hash_to_index(key.partition_hash(), partition_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_is_always_in_range() {
        for hash in [i32::MIN, -1, 0, 1, i32::MAX] {
            let idx = hash_to_index(hash, 271);
            assert!(idx < 271, "{idx} out of range for hash {hash}");
        }
    }

    #[test]
    fn equal_hashes_map_to_the_same_partition() {
        assert_eq!(hash_to_index(12345, 271), hash_to_index(12345, 271));
    }

    #[test]
    fn mapping_is_stable_across_calls_and_partition_counts_match() {
        let count = 271;
        let idx1 = partition_id_for(&"order-42", count);
        let idx2 = partition_id_for(&"order-42", count);
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn different_keys_can_collide_but_same_key_never_moves() {
        let idx = partition_id_for(&-17i32, 7);
        assert!(idx < 7);
    }
}
