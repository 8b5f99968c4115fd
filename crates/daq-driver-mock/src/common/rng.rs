//! Seeded RNG shared by the mock devices.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG for reproducible noise and failure decisions.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create an RNG. Without a seed the OS entropy source is used.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (clamped to 0..=1).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// `value` with uniform relative noise of `±fraction`.
    pub fn jitter(&self, value: f64, fraction: f64) -> f64 {
        if fraction <= 0.0 {
            return value;
        }
        value * (1.0 + self.inner.lock().gen_range(-fraction..=fraction))
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rngs_agree() {
        let a = MockRng::new(Some(7));
        let b = MockRng::new(Some(7));
        for _ in 0..10 {
            assert_eq!(a.jitter(100.0, 0.05), b.jitter(100.0, 0.05));
        }
    }

    #[test]
    fn jitter_stays_in_band() {
        let rng = MockRng::new(Some(1));
        for _ in 0..1000 {
            let v = rng.jitter(10.0, 0.01);
            assert!((9.9..=10.1).contains(&v), "{v}");
        }
        assert_eq!(rng.jitter(10.0, 0.0), 10.0);
    }

    #[test]
    fn rate_extremes() {
        let rng = MockRng::new(Some(3));
        assert!(!rng.should_fail(0.0));
        assert!(rng.should_fail(1.0));
    }
}
