//! Cooldown for repeated denial notices.
//!
//! Banned or rate-limited users who keep writing get the denial text once
//! per cooldown period instead of on every message, which would otherwise
//! push the bot into Telegram's own flood limits.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks when a denial notice was last sent to each user
#[derive(Clone)]
pub struct NoticeCache {
    /// user_id -> (), expiring after the cooldown
    cache: Cache<i64, ()>,
    /// Notices suppressed so far
    silenced_count: Arc<AtomicU64>,
}

impl NoticeCache {
    /// `cooldown_secs` between notices to one user, at most `max_capacity` users tracked
    ///
    /// # Examples
    ///
    /// ```
    /// use muskan_bot::bot::NoticeCache;
    ///
    /// let cache = NoticeCache::new(60, 10_000);
    /// assert_eq!(cache.silenced_count(), 0);
    /// ```
    #[must_use]
    pub fn new(cooldown_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(cooldown_secs))
            .build();

        Self {
            cache,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `true` if `user_id` is not in cooldown
    pub async fn should_send(&self, user_id: i64) -> bool {
        if self.cache.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        // Log only every 100th to keep floods out of the log
        if count.is_multiple_of(100) {
            debug!(count, user_id, "Denial notices silenced");
        }
        false
    }

    /// Start the cooldown for `user_id`
    pub async fn mark_sent(&self, user_id: i64) {
        self.cache.insert(user_id, ()).await;
    }

    /// Total suppressed notices
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }
}
