use std::path::PathBuf;

/// Tunables shared by the metric substrate and the admission pipeline.
///
/// The defaults reproduce the classic geometry: a 1 s sliding interval split
/// into two 500 ms buckets, a 500 ms ceiling on borrowing future capacity and
/// a response-time clamp just below 5 s.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of buckets the 1 s metric interval is divided into.
    pub sample_count: u32,
    /// Width of the short metric interval in milliseconds.
    pub interval_ms: u32,
    /// Upper bound on how far a prioritized call may reach into future
    /// windows before it is rejected outright.
    pub occupy_timeout_ms: u64,
    /// Response times above this are clamped before being recorded.
    pub max_rt_ms: u64,
    /// Cold-start factor of the warm-up shaper.
    pub cold_factor: u32,
    /// When set, a per-second metric record is appended to this file.
    pub metric_log_path: Option<PathBuf>,
    /// How often the metric writer drains completed seconds.
    pub metric_flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_count: 2,
            interval_ms: 1_000,
            occupy_timeout_ms: 500,
            max_rt_ms: 4_900,
            cold_factor: 3,
            metric_log_path: None,
            metric_flush_interval_ms: 1_000,
        }
    }
}

impl Config {
    /// Normalises nonsense geometry back to the defaults rather than failing:
    /// the interval must be a positive multiple of the sample count.
    pub(crate) fn normalized(mut self) -> Self {
        if self.sample_count == 0
            || self.interval_ms == 0
            || self.interval_ms % self.sample_count != 0
        {
            tracing::warn!(
                sample_count = self.sample_count,
                interval_ms = self.interval_ms,
                "invalid metric geometry, falling back to defaults"
            );
            self.sample_count = 2;
            self.interval_ms = 1_000;
        }
        if self.cold_factor <= 1 {
            self.cold_factor = 3;
        }
        self
    }

    #[inline]
    pub(crate) fn window_ms(&self) -> u64 {
        (self.interval_ms / self.sample_count) as u64
    }
}
