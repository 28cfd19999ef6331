use embassy_time::{Duration, Instant};

/// A deadline that is either disarmed or counting from the instant it was
/// armed. Time is always supplied by the caller so the same timer works from
/// task context, interrupt context, and host tests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OneShotTimer {
    armed_at: Option<Instant>,
}

impl OneShotTimer {
    pub const fn new() -> Self {
        Self { armed_at: None }
    }

    pub fn arm(&mut self, now: Instant) {
        self.armed_at = Some(now);
    }

    /// Arms the timer only if it is not already running. Returns true if it
    /// was armed by this call.
    pub fn arm_if_disarmed(&mut self, now: Instant) -> bool {
        if self.armed_at.is_none() {
            self.armed_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn disarm(&mut self) {
        self.armed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.armed_at.map(|start| now.saturating_duration_since(start))
    }

    /// True once at least `duration` has passed since arming. A disarmed
    /// timer never expires.
    pub fn expired(&self, now: Instant, duration: Duration) -> bool {
        match self.elapsed(now) {
            Some(elapsed) => elapsed >= duration,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_timer_never_expires() {
        let timer = OneShotTimer::new();
        assert!(!timer.is_armed());
        assert!(!timer.expired(Instant::from_millis(1_000_000), Duration::from_millis(1)));
    }

    #[test]
    fn expires_after_duration() {
        let mut timer = OneShotTimer::new();
        timer.arm(Instant::from_millis(100));
        assert!(!timer.expired(Instant::from_millis(199), Duration::from_millis(100)));
        assert!(timer.expired(Instant::from_millis(200), Duration::from_millis(100)));
        assert_eq!(timer.elapsed(Instant::from_millis(150)), Some(Duration::from_millis(50)));
    }

    #[test]
    fn arm_if_disarmed_keeps_first_start() {
        let mut timer = OneShotTimer::new();
        assert!(timer.arm_if_disarmed(Instant::from_millis(10)));
        assert!(!timer.arm_if_disarmed(Instant::from_millis(20)));
        assert_eq!(timer.armed_at(), Some(Instant::from_millis(10)));

        timer.disarm();
        assert!(timer.arm_if_disarmed(Instant::from_millis(30)));
        assert_eq!(timer.armed_at(), Some(Instant::from_millis(30)));
    }

    #[test]
    fn clock_going_backwards_reads_as_zero() {
        let mut timer = OneShotTimer::new();
        timer.arm(Instant::from_millis(500));
        assert_eq!(timer.elapsed(Instant::from_millis(400)), Some(Duration::from_millis(0)));
    }
}
