use std::sync::Arc;
use std::time::Duration;

/// Monotonic millisecond clock backed by high-performance TSC timing.
///
/// All window arithmetic in the crate works on milliseconds relative to the
/// anchor captured at construction, so timestamps start near zero and never
/// go backwards unless the underlying source does.
#[derive(Debug, Clone)]
pub struct Clock {
    clock: quanta::Clock,
    anchor: quanta::Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::from_quanta(quanta::Clock::new())
    }

    /// A clock driven by a manual [`quanta::Mock`] handle, for deterministic
    /// window tests.
    pub fn mock() -> (Self, Arc<quanta::Mock>) {
        let (clock, mock) = quanta::Clock::mock();
        (Self::from_quanta(clock), mock)
    }

    fn from_quanta(clock: quanta::Clock) -> Self {
        let anchor = clock.now();
        Self { clock, anchor }
    }

    /// Milliseconds elapsed since the anchor.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock
            .now()
            .duration_since(self.anchor)
            .as_millis() as u64
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.clock.now().duration_since(self.anchor)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
