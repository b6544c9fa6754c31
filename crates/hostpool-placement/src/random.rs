//! Injected randomness: host-name suffixes and poll jitter.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Suffix that keeps generated host names unique within a group.
    fn host_suffix(&self) -> String;

    /// A value in `min..=max`. Returns `min` if the range is empty.
    fn jitter_secs(&self, min: u64, max: u64) -> u64;
}

/// Thread-local RNG, the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn host_suffix(&self) -> String {
        format!("{:08x}", rand::thread_rng().r#gen::<u32>())
    }

    fn jitter_secs(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Reproducible RNG for dry runs and tests.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn host_suffix(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        format!("{:08x}", rng.r#gen::<u32>())
    }

    fn jitter_secs(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_window() {
        let random = ThreadRandom;
        for _ in 0..200 {
            let v = random.jitter_secs(10, 30);
            assert!((10..=30).contains(&v));
        }
    }

    #[test]
    fn empty_window_returns_min() {
        assert_eq!(ThreadRandom.jitter_secs(5, 5), 5);
        assert_eq!(SeededRandom::new(1).jitter_secs(9, 3), 9);
    }

    #[test]
    fn seeded_sources_repeat() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        assert_eq!(a.host_suffix(), b.host_suffix());
        assert_eq!(a.jitter_secs(0, 1000), b.jitter_secs(0, 1000));
    }

    #[test]
    fn suffix_is_eight_hex_chars() {
        let suffix = ThreadRandom.host_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
