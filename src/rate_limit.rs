//! Per-user sliding-window admission control.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Recent admission timestamps of every user.
///
/// Plain data; callers serialize access (see [`RateLimiter`]).
#[derive(Debug, Default)]
pub struct RateWindows {
    windows: HashMap<i64, VecDeque<Instant>>,
}

impl RateWindows {
    /// Prune `user_id`'s window to `window` before `now`, then admit iff fewer
    /// than `max` entries remain. Admission records `now`.
    pub fn admit(&mut self, user_id: i64, now: Instant, window: Duration, max: usize) -> bool {
        let entries = self.windows.entry(user_id).or_default();
        while entries
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            entries.pop_front();
        }

        if entries.len() >= max {
            return false;
        }
        entries.push_back(now);
        true
    }

    /// Drop users whose newest entry has aged out of `window`
    pub fn prune_idle(&mut self, now: Instant, window: Duration) {
        self.windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
    }

    /// Number of users with a live window
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}

/// Shared rate limiter; every prune-and-append runs under one lock.
pub struct RateLimiter {
    windows: Mutex<RateWindows>,
    window: Duration,
    max: usize,
}

/// Idle windows are swept once the map grows past this many users
const PRUNE_THRESHOLD: usize = 1024;

impl RateLimiter {
    /// Allow `max` actions per user in any trailing `window`
    #[must_use]
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(RateWindows::default()),
            window,
            max,
        }
    }

    /// Admit an action by `user_id` at `now`
    pub async fn admit(&self, user_id: i64, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        if windows.tracked_users() > PRUNE_THRESHOLD {
            windows.prune_idle(now, self.window);
        }
        let admitted = windows.admit(user_id, now, self.window, self.max);
        if !admitted {
            debug!(user_id, "Rate limit exceeded");
        }
        admitted
    }

    /// Admit an action by `user_id` right now
    pub async fn admit_now(&self, user_id: i64) -> bool {
        self.admit(user_id, Instant::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_excess_calls_rejected_until_oldest_ages_out() {
        let mut windows = RateWindows::default();
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(windows.admit(1, t0 + Duration::from_secs(i), WINDOW, 3));
        }
        assert!(!windows.admit(1, t0 + Duration::from_secs(10), WINDOW, 3));
        assert!(!windows.admit(1, t0 + Duration::from_secs(59), WINDOW, 3));

        // First entry (t0) expires exactly one window later
        assert!(windows.admit(1, t0 + WINDOW, WINDOW, 3));
        assert!(!windows.admit(1, t0 + WINDOW, WINDOW, 3));
    }

    #[test]
    fn test_rejected_calls_are_not_recorded() {
        let mut windows = RateWindows::default();
        let t0 = Instant::now();

        assert!(windows.admit(1, t0, WINDOW, 1));
        for s in 1..50 {
            assert!(!windows.admit(1, t0 + Duration::from_secs(s), WINDOW, 1));
        }
        assert!(windows.admit(1, t0 + WINDOW, WINDOW, 1));
    }

    #[test]
    fn test_users_are_independent() {
        let mut windows = RateWindows::default();
        let t0 = Instant::now();

        assert!(windows.admit(1, t0, WINDOW, 1));
        assert!(!windows.admit(1, t0, WINDOW, 1));
        assert!(windows.admit(2, t0, WINDOW, 1));
    }

    #[test]
    fn test_prune_idle() {
        let mut windows = RateWindows::default();
        let t0 = Instant::now();

        windows.admit(1, t0, WINDOW, 5);
        windows.admit(2, t0 + Duration::from_secs(30), WINDOW, 5);
        windows.prune_idle(t0 + Duration::from_secs(70), WINDOW);

        assert_eq!(windows.tracked_users(), 1);
    }

    #[tokio::test]
    async fn test_limiter_concurrent_admissions_respect_cap() {
        let limiter = std::sync::Arc::new(RateLimiter::new(5, WINDOW));
        let now = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.admit(7, now).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap_or(false) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    proptest! {
        #[test]
        fn prop_never_more_than_max_in_any_window(
            max in 1usize..6,
            gaps in proptest::collection::vec(0u64..30, 1..60),
        ) {
            let mut windows = RateWindows::default();
            let t0 = Instant::now();
            let mut offset = 0;
            let mut admitted: Vec<u64> = Vec::new();

            for gap in gaps {
                offset += gap;
                if windows.admit(9, t0 + Duration::from_secs(offset), WINDOW, max) {
                    admitted.push(offset);
                }
            }

            for (i, start) in admitted.iter().enumerate() {
                let in_window = admitted[i..]
                    .iter()
                    .take_while(|t| **t < start + WINDOW.as_secs())
                    .count();
                prop_assert!(in_window <= max);
            }
        }
    }
}
