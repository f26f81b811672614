use std::time::{Duration, Instant};

/// How repeated requests inside one window are folded together.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoalesceMode {
    /// Every request pushes the deadline out again; fires once after a burst goes quiet.
    Debounce,
    /// The first request arms the deadline; later requests ride along until it fires.
    Throttle,
}

/// Timer-based coalescing of work requests.
///
/// The coalescer never sleeps itself. Callers feed it the current instant, ask for the
/// pending deadline to sleep on, and call [`Coalescer::fire_if_due`] when they wake.
/// Any number of requests collapse into a single firing per window.
#[derive(Debug, Clone)]
pub struct Coalescer {
    window: Duration,
    mode: CoalesceMode,
    deadline: Option<Instant>,
}

impl Coalescer {
    pub fn new(window: Duration, mode: CoalesceMode) -> Self {
        Self {
            window,
            mode,
            deadline: None,
        }
    }

    pub fn debounce(window: Duration) -> Self {
        Self::new(window, CoalesceMode::Debounce)
    }

    pub fn throttle(window: Duration) -> Self {
        Self::new(window, CoalesceMode::Throttle)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn request(&mut self, now: Instant) {
        match self.mode {
            CoalesceMode::Debounce => self.deadline = Some(now + self.window),
            CoalesceMode::Throttle => {
                if self.deadline.is_none() {
                    self.deadline = Some(now + self.window);
                }
            }
        }
    }

    /// Returns `true` exactly once per armed window, when `now` has reached the deadline.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Earliest of two optional deadlines.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::{Coalescer, earliest};
    use std::time::{Duration, Instant};

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn debounce_fires_once_after_quiet_period() {
        let t0 = Instant::now();
        let mut c = Coalescer::debounce(2 * MS);

        c.request(t0);
        c.request(t0 + MS);
        c.request(t0 + 2 * MS);
        assert!(!c.fire_if_due(t0 + 3 * MS));
        assert_eq!(c.deadline(), Some(t0 + 4 * MS));

        assert!(c.fire_if_due(t0 + 4 * MS));
        assert!(!c.fire_if_due(t0 + 5 * MS));
        assert_eq!(c.deadline(), None);
    }

    #[test]
    fn throttle_keeps_first_deadline() {
        let t0 = Instant::now();
        let mut c = Coalescer::throttle(16 * MS);

        c.request(t0);
        c.request(t0 + 10 * MS);
        assert_eq!(c.deadline(), Some(t0 + 16 * MS));
        assert!(c.fire_if_due(t0 + 16 * MS));

        c.request(t0 + 20 * MS);
        assert_eq!(c.deadline(), Some(t0 + 36 * MS));
    }

    #[test]
    fn earliest_picks_minimum() {
        let t0 = Instant::now();
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(t0), None), Some(t0));
        assert_eq!(earliest(Some(t0 + MS), Some(t0)), Some(t0));
    }
}
