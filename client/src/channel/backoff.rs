use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_failures: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_failures: 8,
        }
    }
}

/// Exponential backoff, reset by every successful connect.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            next: policy.initial,
        }
    }

    /// Records a failure. Returns how long to wait before the next attempt,
    /// or `None` when the failure budget is spent.
    pub fn fail(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures > self.policy.max_failures {
            return None;
        }
        let delay = self.next;
        self.next = (self.next * 2).min(self.policy.max);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next = self.policy.initial;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sequence_caps_and_gives_up() {
        let mut b = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u64> = std::iter::from_fn(|| b.fail())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(b.failures(), 9);
    }

    #[test]
    fn test_reset() {
        let mut b = Backoff::new(ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(15),
            max_failures: 2,
        });
        assert_eq!(b.fail(), Some(Duration::from_millis(10)));
        assert_eq!(b.fail(), Some(Duration::from_millis(15)));
        b.reset();
        assert_eq!(b.fail(), Some(Duration::from_millis(10)));
        assert_eq!(b.failures(), 1);
    }
}
