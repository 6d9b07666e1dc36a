//! Welcome capture flow.
//!
//! A conversation enters `AwaitingWelcomeText` when an admin asks to set the
//! welcome message; the next plain-text message from that admin in that
//! conversation becomes the template and the conversation returns to `Idle`.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Placeholder replaced by the joining member's name
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Greeting used when welcomes are enabled without a stored template
pub const DEFAULT_WELCOME: &str = "Welcome to the group!";

/// Capture state of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No capture in progress
    Idle,
    /// Waiting for the template text from `admin_id`
    AwaitingWelcomeText {
        /// Admin that started the capture
        admin_id: i64,
        /// When the capture started
        since: Instant,
    },
}

/// Per-conversation capture states; conversations absent from the map are `Idle`
pub struct WelcomeCapture {
    pending: Mutex<HashMap<i64, CaptureState>>,
    timeout: Option<Duration>,
}

impl WelcomeCapture {
    /// `timeout` of `None` keeps a capture open until it is consumed or cancelled
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Enter `AwaitingWelcomeText` for `chat_id`, replacing any earlier capture
    pub async fn begin(&self, chat_id: i64, admin_id: i64, now: Instant) {
        self.pending.lock().await.insert(
            chat_id,
            CaptureState::AwaitingWelcomeText {
                admin_id,
                since: now,
            },
        );
        info!(chat_id, admin_id, "Awaiting welcome text");
    }

    /// Current state of `chat_id`, treating expired captures as `Idle`
    pub async fn state(&self, chat_id: i64, now: Instant) -> CaptureState {
        let mut pending = self.pending.lock().await;
        match pending.get(&chat_id).copied() {
            Some(state) if self.is_expired(state, now) => {
                pending.remove(&chat_id);
                CaptureState::Idle
            }
            Some(state) => state,
            None => CaptureState::Idle,
        }
    }

    /// Consume the pending capture if `user_id` is the admin it waits for.
    ///
    /// Returns `true` when the caller should store the message as the template;
    /// the conversation is back to `Idle` at that point.
    pub async fn take(&self, chat_id: i64, user_id: i64, now: Instant) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(state) = pending.get(&chat_id).copied() else {
            return false;
        };
        if self.is_expired(state, now) {
            debug!(chat_id, "Welcome capture expired");
            pending.remove(&chat_id);
            return false;
        }
        match state {
            CaptureState::AwaitingWelcomeText { admin_id, .. } if admin_id == user_id => {
                pending.remove(&chat_id);
                true
            }
            _ => false,
        }
    }

    /// Abort a pending capture; `true` if there was one
    pub async fn cancel(&self, chat_id: i64) -> bool {
        self.pending.lock().await.remove(&chat_id).is_some()
    }

    fn is_expired(&self, state: CaptureState, now: Instant) -> bool {
        match (state, self.timeout) {
            (CaptureState::AwaitingWelcomeText { since, .. }, Some(timeout)) => {
                now.saturating_duration_since(since) >= timeout
            }
            _ => false,
        }
    }
}

/// Substitute every `{name}` in `template`
#[must_use]
pub fn render_welcome(template: &str, name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, name)
}
