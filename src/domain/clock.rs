use std::time::{Duration, Instant};

/// Converts wall-clock progress into whole-second decrements.
///
/// Callbacks may arrive late or in bursts, so the clock never counts
/// callbacks. Each sample measures the real time since the last observed
/// instant, reports the whole seconds in it, and advances the anchor by
/// exactly those seconds so the sub-second remainder carries into the next
/// sample.
#[derive(Debug, Clone, Default)]
pub struct DriftClock {
    last_observed: Option<Instant>,
}

impl DriftClock {
    /// Anchors the clock at `now`. Time before this instant is never counted,
    /// which keeps paused wall time out of the countdown.
    pub fn resume(&mut self, now: Instant) {
        self.last_observed = Some(now);
    }

    pub fn stop(&mut self) {
        self.last_observed = None;
    }

    pub fn is_active(&self) -> bool {
        self.last_observed.is_some()
    }

    pub fn sample(&mut self, now: Instant) -> u32 {
        let Some(last_observed) = self.last_observed else {
            return 0;
        };
        let whole_seconds = now.saturating_duration_since(last_observed).as_secs();
        if whole_seconds == 0 {
            return 0;
        }
        self.last_observed = Some(last_observed + Duration::from_secs(whole_seconds));
        u32::try_from(whole_seconds).unwrap_or(u32::MAX)
    }
}
