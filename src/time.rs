//! Blocking-time specification used by every wait in the crate.

use std::time::{Duration, Instant};

/// How long a blocking call may wait.
///
/// `Timeout::NONE` never blocks, `Timeout::Forever` waits until the awaited
/// state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    /// Block until the awaited condition holds.
    #[default]
    Forever,
    /// Block at most this long.
    After(Duration),
}

impl Timeout {
    /// Do not block at all.
    pub const NONE: Timeout = Timeout::After(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, Timeout::Forever)
    }

    /// True when the call must not block.
    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Forever => None,
            Timeout::After(d) => Some(*d),
        }
    }

    /// Absolute deadline measured from `now`; `None` means forever.
    pub(crate) fn deadline_from(&self, now: Instant) -> Option<Instant> {
        match self {
            Timeout::Forever => None,
            Timeout::After(d) => Some(now.checked_add(*d).unwrap_or(far_future(now))),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Forever, Timeout::After)
    }
}

// Roughly thirty years out; `Instant` has no maximum constant.
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversions() {
        assert!(Timeout::NONE.is_zero());
        assert!(!Timeout::Forever.is_zero());
        assert_eq!(Timeout::from(None), Timeout::Forever);
        assert_eq!(
            Timeout::from(Some(Duration::from_millis(5))),
            Timeout::from_millis(5)
        );
        assert_eq!(Timeout::default(), Timeout::Forever);
    }

    #[test]
    fn test_deadline() {
        let now = Instant::now();
        assert_eq!(Timeout::Forever.deadline_from(now), None);
        assert_eq!(
            Timeout::from_millis(10).deadline_from(now),
            Some(now + Duration::from_millis(10))
        );
        assert!(Timeout::After(Duration::MAX).deadline_from(now).unwrap() > now);
    }
}
