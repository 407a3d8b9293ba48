use std::time::{Duration, Instant};

pub(crate) const DIAG_COOLDOWN: Duration = Duration::from_secs(300);
const DIAG_WINDOW: Duration = Duration::from_secs(3600);
pub(crate) const DIAG_MAX_ATTEMPTS_PER_HOUR: u8 = 3;

/// Keeps the controller at a target diagnostic level. The controller drops
/// back to 0 on its own after a while; reassertions are rate limited so a
/// controller that refuses the level is not hammered.
pub(crate) struct DiagEnforcer {
    pub target_level: u8,
    cooldown: Duration,
    last_sent: Option<Instant>,
    attempts_this_hour: u8,
    hour_start: Instant,
}

impl DiagEnforcer {
    pub fn new(level: u8, cooldown: Duration) -> Self {
        Self {
            target_level: level,
            cooldown,
            last_sent: None,
            attempts_this_hour: 0,
            hour_start: Instant::now(),
        }
    }

    /// True when `reported` is below target and a reassertion is allowed now.
    pub fn needs_reassert(&mut self, reported: Option<u8>) -> bool {
        match reported {
            Some(level) if level < self.target_level => self.should_send(Instant::now()),
            _ => false,
        }
    }

    fn should_send(&mut self, now: Instant) -> bool {
        if now.duration_since(self.hour_start) >= DIAG_WINDOW {
            self.attempts_this_hour = 0;
            self.hour_start = now;
        }

        if self.attempts_this_hour >= DIAG_MAX_ATTEMPTS_PER_HOUR {
            return false;
        }

        if let Some(last) = self.last_sent
            && now.duration_since(last) < self.cooldown
        {
            return false;
        }

        true
    }

    pub fn record_sent(&mut self) {
        self.last_sent = Some(Instant::now());
        self.attempts_this_hour += 1;
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_this_hour >= DIAG_MAX_ATTEMPTS_PER_HOUR
    }

    /// A fresh connection starts a new budget.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.attempts_this_hour = 0;
        self.hour_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reasserts_below_target() {
        let mut e = DiagEnforcer::new(2, DIAG_COOLDOWN);
        assert!(!e.needs_reassert(None));
        assert!(!e.needs_reassert(Some(2)));
        assert!(e.needs_reassert(Some(0)));
    }

    #[test]
    fn cooldown_blocks_immediate_resend() {
        let mut e = DiagEnforcer::new(2, DIAG_COOLDOWN);
        e.record_sent();
        assert!(!e.needs_reassert(Some(0)));
    }

    #[test]
    fn hourly_budget() {
        let mut e = DiagEnforcer::new(1, DIAG_COOLDOWN);
        for _ in 0..DIAG_MAX_ATTEMPTS_PER_HOUR {
            e.record_sent();
        }
        assert!(e.attempts_exhausted());
        e.last_sent = None;
        assert!(!e.needs_reassert(Some(0)));

        e.reset();
        assert!(!e.attempts_exhausted());
        assert!(e.needs_reassert(Some(0)));
    }

    #[test]
    fn zero_cooldown_still_honours_hourly_cap() {
        let mut e = DiagEnforcer::new(2, Duration::ZERO);
        let mut sent = 0;
        while e.needs_reassert(Some(0)) {
            e.record_sent();
            sent += 1;
            assert!(sent <= DIAG_MAX_ATTEMPTS_PER_HOUR);
        }
        assert_eq!(sent, DIAG_MAX_ATTEMPTS_PER_HOUR);
    }
}
