use std::sync::atomic::{AtomicI64, Ordering};

use super::leap_array::WindowBucket;

/// Atomic counter set for one time bucket.
///
/// `min_rt` starts at `i64::MAX` so the first recorded response time wins.
#[derive(Debug)]
pub struct MetricBucket {
    pass: AtomicI64,
    block: AtomicI64,
    exception: AtomicI64,
    success: AtomicI64,
    rt: AtomicI64,
    occupied_pass: AtomicI64,
    min_rt: AtomicI64,
}

impl Default for MetricBucket {
    fn default() -> Self {
        Self {
            pass: AtomicI64::new(0),
            block: AtomicI64::new(0),
            exception: AtomicI64::new(0),
            success: AtomicI64::new(0),
            rt: AtomicI64::new(0),
            occupied_pass: AtomicI64::new(0),
            min_rt: AtomicI64::new(i64::MAX),
        }
    }
}

impl MetricBucket {
    #[inline]
    pub fn add_pass(&self, n: i64) {
        self.pass.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_block(&self, n: i64) {
        self.block.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_exception(&self, n: i64) {
        self.exception.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_success(&self, n: i64) {
        self.success.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_occupied_pass(&self, n: i64) {
        self.occupied_pass.fetch_add(n, Ordering::Relaxed);
    }

    /// Accumulates a response time and keeps the bucket minimum.
    #[inline]
    pub fn add_rt(&self, rt_ms: i64) {
        self.rt.fetch_add(rt_ms, Ordering::Relaxed);
        self.min_rt.fetch_min(rt_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn pass(&self) -> i64 {
        self.pass.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn block(&self) -> i64 {
        self.block.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn exception(&self) -> i64 {
        self.exception.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn success(&self) -> i64 {
        self.success.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rt(&self) -> i64 {
        self.rt.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn occupied_pass(&self) -> i64 {
        self.occupied_pass.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn min_rt(&self) -> i64 {
        self.min_rt.load(Ordering::Relaxed)
    }

    /// Seeds a freshly rolled bucket with capacity borrowed in advance.
    pub fn seed_pass(&self, n: i64) {
        self.pass.store(n, Ordering::Relaxed);
    }
}

impl WindowBucket for MetricBucket {
    fn reset(&self) {
        self.pass.store(0, Ordering::Relaxed);
        self.block.store(0, Ordering::Relaxed);
        self.exception.store(0, Ordering::Relaxed);
        self.success.store(0, Ordering::Relaxed);
        self.rt.store(0, Ordering::Relaxed);
        self.occupied_pass.store(0, Ordering::Relaxed);
        self.min_rt.store(i64::MAX, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_rt_tracks_the_minimum() {
        let b = MetricBucket::default();
        assert_eq!(b.min_rt(), i64::MAX);

        b.add_rt(30);
        b.add_rt(10);
        b.add_rt(20);

        assert_eq!(b.min_rt(), 10);
        assert_eq!(b.rt(), 60);
    }

    #[test]
    fn reset_restores_initial_state() {
        let b = MetricBucket::default();
        b.add_pass(5);
        b.add_block(2);
        b.add_rt(100);

        b.reset();

        assert_eq!(b.pass(), 0);
        assert_eq!(b.block(), 0);
        assert_eq!(b.rt(), 0);
        assert_eq!(b.min_rt(), i64::MAX);
    }
}
