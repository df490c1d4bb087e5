use std::cell::Cell;

/// Small LCG shared by the evaluator and the players.
///
/// Interior mutability lets read-only evaluation scopes draw numbers.
#[derive(Debug, Clone)]
pub struct Rng {
    state: Cell<u64>,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Cell::new(seed),
        }
    }

    pub fn next_u64(&self) -> u64 {
        let next = self
            .state
            .get()
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state.set(next);
        next
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `lo..=hi`; callers pass `lo <= hi`.
    pub fn range_inclusive(&self, lo: i64, hi: i64) -> i64 {
        let span = (hi as i128 - lo as i128 + 1) as u128;
        let offset = ((self.next_u64() >> 16) as u128 % span) as i128;
        (lo as i128 + offset) as i64
    }

    /// Uniform in `0..len`; `len` must be non-zero.
    pub fn below(&self, len: usize) -> usize {
        ((self.next_u64() >> 16) % len as u64) as usize
    }

    pub fn shuffle<T>(&self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::new(0x5EED_CADE_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_inclusive_bounds() {
        let rng = Rng::new(7);
        for _ in 0..500 {
            let v = rng.range_inclusive(1, 10);
            assert!((1..=10).contains(&v));
        }
        assert_eq!(rng.range_inclusive(3, 3), 3);
    }

    #[test]
    fn test_next_f64_unit_interval() {
        let rng = Rng::new(42);
        for _ in 0..500 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_shuffle_keeps_elements() {
        let rng = Rng::new(1);
        let mut items = vec![1, 2, 3, 4, 5];
        rng.shuffle(&mut items);
        items.sort();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }
}
