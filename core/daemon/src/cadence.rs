//! Poll cadence.
//!
//! Normal refresh while the host page is visible, a slower one once it has
//! been hidden for a while, and a short retry when the host reports it is
//! mid-interaction and the roster should not be read.

use qmon_core::PollingConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Cadence {
    refresh: Duration,
    refresh_hidden: Duration,
    hidden_backoff_after: Duration,
    busy_retry: Duration,
    hidden_since: Option<Instant>,
}

impl Cadence {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            refresh: Duration::from_millis(config.refresh_ms.max(1)),
            refresh_hidden: Duration::from_millis(config.refresh_hidden_ms.max(1)),
            hidden_backoff_after: Duration::from_millis(config.hidden_backoff_after_ms),
            busy_retry: Duration::from_millis(config.busy_retry_ms.max(1)),
            hidden_since: None,
        }
    }

    /// Delay before the next poll after a cycle that read the roster.
    /// `host_visible == None` counts as visible.
    pub fn after_cycle(&mut self, host_visible: Option<bool>, now: Instant) -> Duration {
        if host_visible != Some(false) {
            self.hidden_since = None;
            return self.refresh;
        }

        let since = *self.hidden_since.get_or_insert(now);
        if now.duration_since(since) >= self.hidden_backoff_after {
            self.refresh_hidden
        } else {
            self.refresh
        }
    }

    /// Delay before retrying a poll that was skipped because the host was busy.
    pub fn after_busy(&self) -> Duration {
        self.busy_retry
    }

    pub fn is_backed_off(&self, now: Instant) -> bool {
        self.hidden_since
            .is_some_and(|since| now.duration_since(since) >= self.hidden_backoff_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> Cadence {
        Cadence::new(&PollingConfig::default())
    }

    #[test]
    fn visible_host_uses_normal_refresh() {
        let mut cadence = cadence();
        let now = Instant::now();
        assert_eq!(cadence.after_cycle(Some(true), now), Duration::from_millis(1_500));
        assert_eq!(cadence.after_cycle(None, now), Duration::from_millis(1_500));
    }

    #[test]
    fn hidden_host_backs_off_after_grace_period() {
        let mut cadence = cadence();
        let start = Instant::now();

        assert_eq!(cadence.after_cycle(Some(false), start), Duration::from_millis(1_500));
        assert!(!cadence.is_backed_off(start + Duration::from_secs(30)));
        assert_eq!(
            cadence.after_cycle(Some(false), start + Duration::from_secs(60)),
            Duration::from_millis(4_000)
        );
        assert!(cadence.is_backed_off(start + Duration::from_secs(60)));

        assert_eq!(
            cadence.after_cycle(Some(true), start + Duration::from_secs(61)),
            Duration::from_millis(1_500)
        );
        assert!(!cadence.is_backed_off(start + Duration::from_secs(61)));
    }

    #[test]
    fn busy_host_retries_quickly() {
        assert_eq!(cadence().after_busy(), Duration::from_millis(500));
    }
}
