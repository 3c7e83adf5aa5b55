//! The shard-local timestamp counter
//!
//! Each shard owns one lane of the integer space: values congruent to its
//! seed modulo the stride. `next()` is a single atomic fetch-add.
//!
//! With a state file the counter survives restarts by resuming at the first
//! lane value strictly above the persisted high-water mark. Without one the
//! counter restarts from the seed and may reissue values; downstream
//! metadata absorbs duplicates through GREATEST semantics.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

struct StateFile {
    path: PathBuf,
    high: Mutex<u64>,
}

pub struct ShardCounter {
    seed: u64,
    stride: u64,
    counter: AtomicU64,
    state: Option<StateFile>,
}

impl ShardCounter {
    /// Memory-only counter starting at the seed
    pub fn new(seed: u64, stride: u64) -> Self {
        assert!(seed >= 1, "seed must be strictly positive");
        assert!(stride >= 1, "stride must be strictly positive");
        Self {
            seed,
            stride,
            counter: AtomicU64::new(seed),
            state: None,
        }
    }

    /// Counter backed by a state file; resumes above the last persisted
    /// grant after a restart.
    pub fn with_state_file(seed: u64, stride: u64, path: PathBuf) -> io::Result<Self> {
        let persisted = match fs::read_to_string(&path) {
            Ok(content) => content.trim().parse::<u64>().ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let counter = Self::new(seed, stride);
        let start = match persisted {
            Some(high) if high >= seed => {
                // First lane value strictly above the persisted grant
                let steps = (high - seed) / stride + 1;
                seed + steps * stride
            }
            _ => seed,
        };
        counter.counter.store(start, Ordering::SeqCst);

        Ok(Self {
            state: Some(StateFile {
                path,
                high: Mutex::new(persisted.unwrap_or(0)),
            }),
            ..counter
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// The next value this shard would issue
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Issue the next timestamp in this shard's lane
    pub fn next(&self) -> u64 {
        let value = self.counter.fetch_add(self.stride, Ordering::SeqCst);
        self.persist(value);
        value
    }

    /// Reset to the seed. Destructive: callers must pair this with a
    /// cluster-wide data clear.
    pub fn reset(&self) {
        self.counter.store(self.seed, Ordering::SeqCst);
        if let Some(state) = &self.state {
            let mut high = state.high.lock();
            *high = 0;
            if let Err(e) = fs::remove_file(&state.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove shard state file: {}", e);
                }
            }
        }
    }

    fn persist(&self, value: u64) {
        if let Some(state) = &self.state {
            let mut high = state.high.lock();
            if value > *high {
                *high = value;
                if let Err(e) = fs::write(&state.path, value.to_string()) {
                    tracing::warn!("failed to persist shard state: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_next_increases_by_stride() {
        let counter = ShardCounter::new(1, 2);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 3);
        assert_eq!(counter.next(), 5);
    }

    #[test]
    fn test_lanes_are_disjoint() {
        let odd = ShardCounter::new(1, 2);
        let even = ShardCounter::new(2, 2);

        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(odd.next()));
            assert!(seen.insert(even.next()));
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_mod_k_lane_discipline() {
        let counter = ShardCounter::new(3, 5);
        for _ in 0..50 {
            assert_eq!(counter.next() % 5, 3);
        }
    }

    #[test]
    fn test_reset_returns_to_seed() {
        let counter = ShardCounter::new(2, 2);
        counter.next();
        counter.next();
        counter.reset();
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_concurrent_grants_are_unique_and_monotone_per_shard() {
        let counter = Arc::new(ShardCounter::new(1, 2));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                (0..25).map(|_| counter.next()).collect::<Vec<_>>()
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let grants = handle.join().unwrap();
            // Each thread observes strictly increasing values
            assert!(grants.windows(2).all(|w| w[0] < w[1]));
            all.extend(grants);
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 200);
    }

    #[test]
    fn test_state_file_resume_skips_issued_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("shard.state");

        let counter = ShardCounter::with_state_file(1, 2, path.clone()).unwrap();
        let last = (0..5).map(|_| counter.next()).last().unwrap();
        assert_eq!(last, 9);
        drop(counter);

        // A restarted shard with the same seed resumes above the high-water
        let counter = ShardCounter::with_state_file(1, 2, path.clone()).unwrap();
        assert_eq!(counter.next(), 11);
    }

    #[test]
    fn test_state_file_reset_clears_high_water() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("shard.state");

        let counter = ShardCounter::with_state_file(4, 4, path.clone()).unwrap();
        counter.next();
        counter.reset();
        assert!(!path.exists());
        assert_eq!(counter.next(), 4);
    }
}
