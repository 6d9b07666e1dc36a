//! Text helpers and the Telegram API retry wrapper.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use muskan_bot::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Whether `text` is a bot command, e.g. `/play x` or `/foo@other_bot`.
///
/// Telegram only treats a leading slash as a command.
///
/// ```
/// use muskan_bot::utils::is_command_text;
/// assert!(is_command_text("/play@other_bot despacito"));
/// assert!(!is_command_text("Hi {name}, see /rules"));
/// ```
#[must_use]
pub fn is_command_text(text: &str) -> bool {
    text.starts_with('/')
}

/// Formats seconds as `m:ss`, or `h:mm:ss` from one hour up.
///
/// # Examples
///
/// ```
/// use muskan_bot::utils::format_duration;
/// assert_eq!(format_duration(Some(201)), "3:21");
/// assert_eq!(format_duration(Some(3725)), "1:02:05");
/// assert_eq!(format_duration(None), "?:??");
/// ```
#[must_use]
pub fn format_duration(secs: Option<u32>) -> String {
    let Some(secs) = secs else {
        return "?:??".to_string();
    };
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Retry a Telegram API operation with exponential backoff.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (see the constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if every attempt fails.
///
/// # Examples
///
/// ```no_run
/// use muskan_bot::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn send() -> Result<()> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<()> {
/// retry_telegram_operation(|| async { send().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(0)), "0:00");
        assert_eq!(format_duration(Some(59)), "0:59");
        assert_eq!(format_duration(Some(900)), "15:00");
        assert_eq!(format_duration(Some(3600)), "1:00:00");
    }

    #[test]
    fn test_is_command_text() {
        assert!(is_command_text("/foo"));
        assert!(is_command_text("/play@other_bot x"));
        assert!(!is_command_text("Welcome {name}!"));
        assert!(!is_command_text(" /padded"));
        assert!(!is_command_text(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let result = retry_telegram_operation(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("timed out");
            }
            Ok(7)
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_telegram_operation(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;

        assert!(result.is_err());
        // First try plus TELEGRAM_API_MAX_RETRIES retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
