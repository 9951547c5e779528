#![forbid(unsafe_code)]

/// 64-bit djb2 hash.
#[inline]
pub fn djb2_hash64(bytes: &[u8]) -> u64 {
	let mut hash: u64 = 5381;
	for b in bytes {
		hash = hash.wrapping_mul(33) ^ u64::from(*b);
	}
	hash
}

/// Finalizer that spreads djb2's weak low bits across the whole word.
#[inline]
fn mix64(mut x: u64) -> u64 {
	x ^= x >> 33;
	x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
	x ^= x >> 33;
	x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
	x ^= x >> 33;
	x
}

/// Maps a key to the index of the owner that serializes its updates.
///
/// Must be deterministic: the same key always resolves to the same owner.
pub trait ResolveOwner: Send + Sync {
	fn resolve_owner(&self, key: &str) -> usize;

	fn owner_count(&self) -> usize;
}

/// Fixed-size hash partitioning over `owners` shards.
#[derive(Debug, Clone, Copy)]
pub struct HashResolver {
	owners: usize,
}

impl HashResolver {
	pub fn new(owners: usize) -> Self {
		Self { owners: owners.max(1) }
	}
}

impl ResolveOwner for HashResolver {
	fn resolve_owner(&self, key: &str) -> usize {
		(mix64(djb2_hash64(key.as_bytes())) % self.owners as u64) as usize
	}

	fn owner_count(&self) -> usize {
		self.owners
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use proptest::prelude::*;

	use super::*;

	#[test]
	fn zero_owners_is_clamped_to_one() {
		let r = HashResolver::new(0);
		assert_eq!(r.owner_count(), 1);
		assert_eq!(r.resolve_owner("anything"), 0);
	}

	#[test]
	fn keys_spread_across_owners() {
		let r = HashResolver::new(8);
		let used: HashSet<usize> = (0..512).map(|i| r.resolve_owner(&format!("g1_chat_topic_{i}"))).collect();
		assert_eq!(used.len(), 8);
	}

	proptest! {
		#[test]
		fn resolution_is_stable_and_in_range(key in ".{0,48}", owners in 1usize..64) {
			let r = HashResolver::new(owners);
			let first = r.resolve_owner(&key);
			prop_assert!(first < owners);
			prop_assert_eq!(first, HashResolver::new(owners).resolve_owner(&key));
		}
	}
}
