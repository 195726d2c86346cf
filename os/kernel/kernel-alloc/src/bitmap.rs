//! # Frame Bitmap
//!
//! One bit per frame, `1` = in use. Storage is borrowed, so the same type
//! works for a bitmap placed in raw RAM during boot and for a plain array in
//! tests.

/// Bit array over `len` entries backed by borrowed words.
pub struct Bitmap<'a> {
    words: &'a mut [u64],
    len: usize,
}

impl<'a> Bitmap<'a> {
    /// Words needed to hold `len` bits.
    #[inline]
    #[must_use]
    pub const fn words_for(len: usize) -> usize {
        len.div_ceil(64)
    }

    /// Wrap `words` and mark every bit as used.
    ///
    /// # Panics
    /// If `words` is too short for `len` bits.
    pub fn new_used(words: &'a mut [u64], len: usize) -> Self {
        assert!(
            words.len() >= Self::words_for(len),
            "bitmap storage too small for {len} bits"
        );
        words.fill(u64::MAX);
        Self { words, len }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn is_set(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] |= 1 << (i % 64);
    }

    #[inline]
    pub fn clear(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] &= !(1 << (i % 64));
    }

    /// Lowest index `i` with `i % align == 0` such that bits `i..i + count`
    /// are all clear.
    ///
    /// `align` must be a power of two.
    #[must_use]
    pub fn find_clear_run(&self, count: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        if count == 0 || count > self.len {
            return None;
        }

        let mut start = 0;
        while start + count <= self.len {
            // A used bit inside the candidate moves the search past it.
            match (start..start + count).find(|&i| self.is_set(i)) {
                None => return Some(start),
                Some(used) => start = (used + 1).next_multiple_of(align),
            }
        }
        None
    }

    /// Iterate over maximal runs of clear bits as `(start, end)` pairs.
    pub fn clear_runs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut i = 0;
        core::iter::from_fn(move || {
            while i < self.len && self.is_set(i) {
                i += 1;
            }
            if i >= self.len {
                return None;
            }
            let start = i;
            while i < self.len && !self.is_set(i) {
                i += 1;
            }
            Some((start, i))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_fully_used() {
        let mut words = [0u64; 2];
        let bm = Bitmap::new_used(&mut words, 100);
        assert!((0..100).all(|i| bm.is_set(i)));
        assert_eq!(bm.clear_runs().count(), 0);
    }

    #[test]
    fn first_fit_respects_alignment() {
        let mut words = [0u64; 1];
        let mut bm = Bitmap::new_used(&mut words, 64);
        for i in 3..20 {
            bm.clear(i);
        }
        assert_eq!(bm.find_clear_run(2, 1), Some(3));
        assert_eq!(bm.find_clear_run(4, 4), Some(4));
        assert_eq!(bm.find_clear_run(8, 8), Some(8));
        assert_eq!(bm.find_clear_run(16, 16), None);
    }

    #[test]
    fn runs_are_maximal() {
        let mut words = [0u64; 2];
        let mut bm = Bitmap::new_used(&mut words, 128);
        for i in (10..70).chain(100..128) {
            bm.clear(i);
        }
        bm.set(40);
        let runs: Vec<_> = bm.clear_runs().collect();
        assert_eq!(runs, vec![(10, 40), (41, 70), (100, 128)]);
    }
}
