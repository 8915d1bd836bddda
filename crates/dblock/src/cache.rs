use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::{AD_FILTERING_DNS, ADULT_FILTERING_DNS, FAMILY_DNS};

const BUCKET_COUNT: usize = 256;

/// The two filtering flags. Always read and written as a pair: a reader can
/// never observe one flag updated and the other stale relative to the same
/// write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    pub ad_block: bool,
    pub adult_block: bool,
}

impl Policy {
    const AD_BLOCK_BIT: u8 = 1 << 0;
    const ADULT_BLOCK_BIT: u8 = 1 << 1;

    fn from_bits(bits: u8) -> Self {
        Policy {
            ad_block: bits & Self::AD_BLOCK_BIT != 0,
            adult_block: bits & Self::ADULT_BLOCK_BIT != 0,
        }
    }

    fn to_bits(self) -> u8 {
        (self.ad_block as u8) * Self::AD_BLOCK_BIT + (self.adult_block as u8) * Self::ADULT_BLOCK_BIT
    }

    /// Resolver selection table. `None` means the packet keeps whatever
    /// resolver the system already picked.
    pub fn upstream(self) -> Option<Ipv4Addr> {
        match (self.ad_block, self.adult_block) {
            (true, true) => Some(FAMILY_DNS),
            (true, false) => Some(AD_FILTERING_DNS),
            (false, true) => Some(ADULT_FILTERING_DNS),
            (false, false) => None,
        }
    }
}

#[derive(Clone)]
struct DomainTable {
    buckets: Vec<Vec<Arc<str>>>,
}

impl DomainTable {
    fn new() -> Self {
        DomainTable {
            buckets: vec![Vec::new(); BUCKET_COUNT],
        }
    }
}

// h = h*31 + byte, masked to the 8-bit table
fn bucket_idx(domain: &str) -> usize {
    let hash = domain
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(byte as u32));
    (hash & (BUCKET_COUNT as u32 - 1)) as usize
}

/// Concurrent set of blocked domains plus the policy flag pair.
///
/// Lookups are lock-free: they load the current table snapshot and walk one
/// bucket. Writes clone the table under a writer mutex and swap it in
/// wholesale; a superseded table stays alive until the last reader that
/// loaded it drops its guard, which is the grace period that keeps in-flight
/// lookups safe.
///
/// Entries are exact-match and case-sensitive. Inserts do not deduplicate
/// and removal unlinks only the first match, so duplicates survive a single
/// removal.
pub struct BlocklistCache {
    table: ArcSwap<DomainTable>,
    policy: AtomicU8,
    // Structural writes exclude each other; readers never take it
    write_lock: Mutex<()>,
}

impl BlocklistCache {
    pub fn new() -> Self {
        BlocklistCache {
            table: ArcSwap::from_pointee(DomainTable::new()),
            policy: AtomicU8::new(Policy::default().to_bits()),
            write_lock: Mutex::new(()),
        }
    }

    /// Lock-free and allocation-free: safe to call from the packet path
    /// concurrently with any number of readers and one writer.
    pub fn contains(&self, domain: &str) -> bool {
        let table = self.table.load();
        table.buckets[bucket_idx(domain)]
            .iter()
            .any(|entry| entry.as_ref() == domain)
    }

    pub fn insert(&self, domain: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = DomainTable::clone(&self.table.load_full());
        table.buckets[bucket_idx(domain)].push(Arc::from(domain));
        self.table.store(Arc::new(table));
        tracing::debug!(domain, "added domain to cache");
    }

    pub fn remove(&self, domain: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = DomainTable::clone(&self.table.load_full());
        let bucket = &mut table.buckets[bucket_idx(domain)];
        if let Some(pos) = bucket.iter().position(|entry| entry.as_ref() == domain) {
            bucket.remove(pos);
            self.table.store(Arc::new(table));
            tracing::debug!(domain, "removed domain from cache");
        }
    }

    /// Replaces both flags atomically and returns the previous pair.
    pub fn set_policy(&self, policy: Policy) -> Policy {
        Policy::from_bits(self.policy.swap(policy.to_bits(), Ordering::SeqCst))
    }

    /// One atomic read of both flags together.
    pub fn snapshot_policy(&self) -> Policy {
        Policy::from_bits(self.policy.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.table.load().buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlocklistCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains_then_remove() {
        let cache = BlocklistCache::new();
        assert!(!cache.contains("ads.example.com"));

        cache.insert("ads.example.com");
        assert!(cache.contains("ads.example.com"));
        assert_eq!(cache.len(), 1);

        cache.remove("ads.example.com");
        assert!(!cache.contains("ads.example.com"));
        assert!(cache.is_empty());
    }

    #[test]
    fn lookups_are_case_sensitive() {
        let cache = BlocklistCache::new();
        cache.insert("Ads.Example.Com");
        assert!(cache.contains("Ads.Example.Com"));
        assert!(!cache.contains("ads.example.com"));
    }

    #[test]
    fn duplicates_survive_a_single_removal() {
        let cache = BlocklistCache::new();
        cache.insert("ads.example.com");
        cache.insert("ads.example.com");
        assert_eq!(cache.len(), 2);

        cache.remove("ads.example.com");
        assert!(cache.contains("ads.example.com"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removing_a_missing_domain_is_a_noop() {
        let cache = BlocklistCache::new();
        cache.insert("a.com");
        cache.remove("b.com");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn policy_updates_return_the_previous_pair() {
        let cache = BlocklistCache::new();
        assert_eq!(cache.snapshot_policy(), Policy::default());

        let previous = cache.set_policy(Policy {
            ad_block: true,
            adult_block: false,
        });
        assert_eq!(previous, Policy::default());

        let previous = cache.set_policy(Policy {
            ad_block: true,
            adult_block: true,
        });
        assert!(previous.ad_block);
        assert!(!previous.adult_block);
        assert!(cache.snapshot_policy().adult_block);
    }

    #[test]
    fn resolver_selection_table() {
        let policy = |ad_block, adult_block| Policy { ad_block, adult_block };
        assert_eq!(policy(true, true).upstream(), Some(FAMILY_DNS));
        assert_eq!(policy(true, false).upstream(), Some(AD_FILTERING_DNS));
        assert_eq!(policy(false, true).upstream(), Some(ADULT_FILTERING_DNS));
        assert_eq!(policy(false, false).upstream(), None);
    }

    #[test]
    fn concurrent_readers_survive_a_writer() {
        let cache = Arc::new(BlocklistCache::new());
        cache.insert("pinned.example.com");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        assert!(cache.contains("pinned.example.com"));
                        let _ = cache.contains("churn.example.com");
                    }
                })
            })
            .collect();

        for _ in 0..1_000 {
            cache.insert("churn.example.com");
            cache.remove("churn.example.com");
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(!cache.contains("churn.example.com"));
    }
}
