//! The coordinating service object.
//!
//! [`BotCore`] owns every piece of shared state (group settings, welcome
//! captures, relay contacts, bans, rate windows and the media queue) and
//! exposes one method per chat operation. Methods return the reply text or a
//! [`BotError`]; the transport only renders.

use crate::config::{Settings, FETCH_TIMEOUT_SECS, SEARCH_RESULTS_LIMIT, UPLOAD_TIMEOUT_SECS};
use crate::delivery::Delivery;
use crate::error::{BotError, Denial};
use crate::groups::{Feature, GroupSettings, GroupStore, SettingsStore, SetupOutcome};
use crate::media::MediaSource;
use crate::queue::{MediaQueue, QueueLimits, QueueRequest};
use crate::rate_limit::RateLimiter;
use crate::relay::{BanSet, RelayTable};
use crate::utils::{format_duration, is_command_text};
use crate::welcome::{render_welcome, WelcomeCapture, DEFAULT_WELCOME};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The user behind an inbound event and the chat it arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// User id
    pub user_id: i64,
    /// Chat id
    pub chat_id: i64,
    /// Username, or first name when there is none
    pub name: String,
}

impl Actor {
    /// Build an actor
    pub fn new(user_id: i64, chat_id: i64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            name: name.into(),
        }
    }
}

/// A member who just joined a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    /// User id
    pub user_id: i64,
    /// Name substituted into the welcome template
    pub first_name: String,
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Messages accepted by the platform
    pub delivered: usize,
    /// Messages that failed
    pub failed: usize,
}

/// Reply texts shared with the transport
pub mod texts {
    /// `/play` without a query
    pub const PLAY_USAGE: &str = "Please specify a song after /play";
    /// `/search` without a query
    pub const SEARCH_USAGE: &str = "Please specify a song after /search";
    /// Skip with nothing queued
    pub const NOTHING_TO_SKIP: &str = "ℹ️ Nothing to skip.";
    /// Queue listing when empty
    pub const QUEUE_EMPTY: &str = "📭 The queue is empty. Use /play <song> to add one.";
    /// Settings requested before `/setup`
    pub const NOT_SET_UP: &str = "Group not setup. Use /setup first";
    /// `/setup` created settings
    pub const SETUP_DONE: &str = "✅ Group setup complete! Use /settings to configure";
    /// `/setup` on an existing group
    pub const ALREADY_SET_UP: &str = "ℹ️ Group already setup";
    /// Capture started
    pub const SEND_WELCOME_NOW: &str =
        "✍️ Send your welcome message now. Use {name} for the new member's name, /cancel to abort.";
    /// Capture consumed
    pub const WELCOME_SET: &str = "✅ Welcome message set!";
    /// Forward acknowledged
    pub const SENT_TO_ADMIN: &str = "✅ Your message has been sent to admin!";
    /// Relay target unknown
    pub const USER_NOT_FOUND: &str = "User not found.";
}

/// Shared state and operations of the bot
pub struct BotCore {
    groups: GroupStore,
    welcome: WelcomeCapture,
    relay: RelayTable,
    bans: BanSet,
    limiter: RateLimiter,
    queue: Arc<MediaQueue>,
    source: Arc<dyn MediaSource>,
    delivery: Arc<dyn Delivery>,
    preview_len: usize,
}

impl BotCore {
    /// Wire the core from settings and collaborators.
    ///
    /// Call [`BotCore::load`] and [`BotCore::start`] before serving events.
    pub fn new(
        settings: &Settings,
        store: Box<dyn SettingsStore>,
        source: Arc<dyn MediaSource>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let limits = QueueLimits {
            max_duration_secs: settings.max_duration_secs,
            max_file_size_bytes: settings.max_file_size_bytes(),
            max_len: settings.max_queue_len,
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(UPLOAD_TIMEOUT_SECS),
        };
        Self {
            groups: GroupStore::new(store, settings.admin_id),
            welcome: WelcomeCapture::new(settings.welcome_capture_timeout()),
            relay: RelayTable::new(),
            bans: BanSet::new(),
            limiter: RateLimiter::new(settings.rate_limit_messages, settings.rate_window()),
            queue: MediaQueue::new(Arc::clone(&source), Arc::clone(&delivery), limits),
            source,
            delivery,
            preview_len: settings.queue_preview_len,
        }
    }

    /// Load persisted group settings
    pub async fn load(&self) {
        self.groups.load().await;
    }

    /// Start the queue drain
    pub fn start(&self) -> JoinHandle<()> {
        self.queue.spawn_drain()
    }

    /// The media queue
    #[must_use]
    pub fn queue(&self) -> &Arc<MediaQueue> {
        &self.queue
    }

    /// Group settings store
    #[must_use]
    pub const fn groups(&self) -> &GroupStore {
        &self.groups
    }

    /// Ban and rate gate for actions that consume resources
    async fn admit(&self, user_id: i64) -> Result<(), BotError> {
        if self.bans.is_banned(user_id).await {
            return Err(Denial::Banned.into());
        }
        if !self.limiter.admit_now(user_id).await {
            return Err(Denial::RateLimited.into());
        }
        Ok(())
    }

    async fn require_admin(&self, user_id: i64, chat_id: i64) -> Result<(), BotError> {
        if self.groups.is_admin(user_id, chat_id).await {
            Ok(())
        } else {
            Err(Denial::NotAdmin.into())
        }
    }

    fn require_super_admin(&self, user_id: i64) -> Result<(), BotError> {
        if user_id == self.groups.super_admin() {
            Ok(())
        } else {
            Err(Denial::SuperAdminOnly.into())
        }
    }

    // --- media queue ---

    /// Resolve `query` and append the best match to the queue
    ///
    /// # Errors
    ///
    /// Validation for an empty query, Permission for ban / rate limit /
    /// disabled music, NotFound / ResourceLimit / External from resolution
    /// and enqueue.
    pub async fn play(&self, actor: &Actor, query: &str) -> Result<String, BotError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BotError::validation(texts::PLAY_USAGE));
        }
        self.admit(actor.user_id).await?;
        if !self.groups.music_allowed(actor.chat_id).await {
            return Err(Denial::MusicDisabled.into());
        }

        let hit = self.queue.resolve(query).await?;
        let request = QueueRequest {
            user_id: actor.user_id,
            chat_id: actor.chat_id,
            query: query.to_string(),
            requested_by: actor.name.clone(),
        };
        let enqueued = self.queue.enqueue(request, hit).await?;

        let item = &enqueued.item;
        let duration = format_duration(item.duration_secs);
        Ok(if enqueued.position == 1 {
            format!("🎧 Added to queue: {} ({duration})", item.title)
        } else {
            format!(
                "🎧 Added to queue: {} ({duration}), position {}",
                item.title, enqueued.position
            )
        })
    }

    /// List the top matches for `query` without queueing anything
    ///
    /// # Errors
    ///
    /// Validation, Permission (ban / rate limit), NotFound or External.
    pub async fn search(&self, actor: &Actor, query: &str) -> Result<String, BotError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BotError::validation(texts::SEARCH_USAGE));
        }
        self.admit(actor.user_id).await?;

        let hits = self
            .source
            .search(query, SEARCH_RESULTS_LIMIT)
            .await
            .map_err(|e| BotError::External(anyhow::anyhow!(e)))?;
        if hits.is_empty() {
            return Err(BotError::not_found(format!("No results found for \"{query}\"")));
        }

        let mut text = format!("🔎 Results for \"{query}\":\n");
        for (i, hit) in hits.iter().enumerate() {
            let _ = write!(
                text,
                "\n{}. {} ({}) by {}\n{}",
                i + 1,
                hit.title,
                format_duration(hit.duration_secs),
                hit.uploader,
                hit.webpage_url
            );
        }
        text.push_str("\n\nUse /play <song> to queue one.");
        Ok(text)
    }

    /// Snapshot of the queue head
    pub async fn show_queue(&self) -> String {
        let snapshot = self.queue.snapshot(self.preview_len).await;
        if snapshot.total == 0 {
            return texts::QUEUE_EMPTY.to_string();
        }

        let mut text = format!("🎶 Queue ({} tracks):\n", snapshot.total);
        for (i, item) in snapshot.items.iter().enumerate() {
            let marker = if snapshot.active == Some(item.id) {
                "▶️"
            } else {
                "•"
            };
            let _ = write!(
                text,
                "\n{marker} {}. {} ({}) requested by {}",
                i + 1,
                item.title,
                format_duration(item.duration_secs),
                item.requested_by
            );
        }
        let remaining = snapshot.remaining();
        if remaining > 0 {
            let _ = write!(text, "\n\n…and {remaining} more");
        }
        text
    }

    /// Skip the current head
    ///
    /// # Errors
    ///
    /// Permission when `actor` neither requested the head nor administers its chat.
    pub async fn skip(&self, actor: &Actor) -> Result<String, BotError> {
        let Some(head) = self.queue.head().await else {
            return Ok(texts::NOTHING_TO_SKIP.to_string());
        };
        if head.user_id != actor.user_id && !self.groups.is_admin(actor.user_id, head.chat_id).await
        {
            return Err(Denial::NotRequester.into());
        }

        match self.queue.skip_head(head.id).await {
            Some(item) => {
                info!(item_id = item.id, user_id = actor.user_id, "Track skipped");
                Ok(format!("⏭ Skipped: {}", item.title))
            }
            // The head finished between the peek and the skip
            None => Ok(texts::NOTHING_TO_SKIP.to_string()),
        }
    }

    /// Drop every queued item
    ///
    /// # Errors
    ///
    /// Permission unless `actor` administers the chat the command came from.
    pub async fn clear(&self, actor: &Actor) -> Result<String, BotError> {
        self.require_admin(actor.user_id, actor.chat_id).await?;
        let count = self.queue.clear().await;
        info!(user_id = actor.user_id, chat_id = actor.chat_id, count, "Queue cleared by admin");
        Ok(if count == 0 {
            "ℹ️ The queue is already empty.".to_string()
        } else {
            format!("🗑 Cleared {count} tracks from the queue.")
        })
    }

    // --- group configuration ---

    /// Create settings for the actor's chat, owned by the actor
    pub async fn setup(&self, actor: &Actor) -> String {
        match self.groups.setup(actor.chat_id, actor.user_id).await {
            SetupOutcome::Created => texts::SETUP_DONE.to_string(),
            SetupOutcome::AlreadySetUp => texts::ALREADY_SET_UP.to_string(),
        }
    }

    /// Settings of the actor's chat, for rendering the settings menu
    ///
    /// # Errors
    ///
    /// NotFound before `/setup`, Permission for non-admins.
    pub async fn settings_menu(&self, actor: &Actor) -> Result<GroupSettings, BotError> {
        let settings = self.group_settings(actor.chat_id).await?;
        self.require_admin(actor.user_id, actor.chat_id).await?;
        Ok(settings)
    }

    async fn group_settings(&self, chat_id: i64) -> Result<GroupSettings, BotError> {
        self.groups
            .settings(chat_id)
            .await
            .ok_or_else(|| BotError::not_found(texts::NOT_SET_UP))
    }

    /// Flip a feature of `chat_id`
    ///
    /// # Errors
    ///
    /// Permission for non-admins, NotFound before `/setup`.
    pub async fn toggle(
        &self,
        actor: &Actor,
        chat_id: i64,
        feature: Feature,
    ) -> Result<String, BotError> {
        self.require_admin(actor.user_id, chat_id).await?;
        let value = self
            .groups
            .toggle(chat_id, feature)
            .await
            .ok_or_else(|| BotError::not_found(texts::NOT_SET_UP))?;
        let state = if value { "ON" } else { "OFF" };
        Ok(match feature {
            Feature::Music => format!("🎵 Music is now {state}"),
            Feature::Welcome => format!("👋 Welcome messages are now {state}"),
        })
    }

    /// Start capturing the welcome template of `chat_id` from the actor
    ///
    /// # Errors
    ///
    /// Permission for non-admins, NotFound before `/setup`.
    pub async fn begin_welcome_capture(
        &self,
        actor: &Actor,
        chat_id: i64,
    ) -> Result<String, BotError> {
        self.require_admin(actor.user_id, chat_id).await?;
        self.group_settings(chat_id).await?;
        self.welcome
            .begin(chat_id, actor.user_id, Instant::now())
            .await;
        Ok(texts::SEND_WELCOME_NOW.to_string())
    }

    /// Consume `text` as the welcome template if a capture waits for the actor.
    ///
    /// `None` means no capture was pending and the text is not consumed.
    /// Commands are never consumed; the capture keeps waiting.
    pub async fn capture_welcome_text(&self, actor: &Actor, text: &str) -> Option<String> {
        if is_command_text(text) {
            return None;
        }
        if !self
            .welcome
            .take(actor.chat_id, actor.user_id, Instant::now())
            .await
        {
            return None;
        }
        if self.groups.set_welcome(actor.chat_id, text.to_string()).await {
            Some(texts::WELCOME_SET.to_string())
        } else {
            Some(BotError::not_found(texts::NOT_SET_UP).user_message())
        }
    }

    /// Abort a pending welcome capture in the actor's chat
    ///
    /// # Errors
    ///
    /// Permission for non-admins.
    pub async fn cancel_welcome_capture(&self, actor: &Actor) -> Result<String, BotError> {
        self.require_admin(actor.user_id, actor.chat_id).await?;
        Ok(if self.welcome.cancel(actor.chat_id).await {
            "❎ Welcome message setup cancelled.".to_string()
        } else {
            "ℹ️ Nothing to cancel.".to_string()
        })
    }

    /// Set the welcome template of the actor's chat in one step
    ///
    /// # Errors
    ///
    /// Validation for an empty template, Permission for non-admins, NotFound before `/setup`.
    pub async fn set_welcome(&self, actor: &Actor, template: &str) -> Result<String, BotError> {
        let template = template.trim();
        if template.is_empty() {
            return Err(BotError::validation("Usage: /welcome <message>, {name} is replaced by the member's name"));
        }
        self.require_admin(actor.user_id, actor.chat_id).await?;
        if !self
            .groups
            .set_welcome(actor.chat_id, template.to_string())
            .await
        {
            return Err(BotError::not_found(texts::NOT_SET_UP));
        }
        Ok(texts::WELCOME_SET.to_string())
    }

    /// Greetings for members who just joined `chat_id`; the bot itself is skipped
    pub async fn welcome_new_members(
        &self,
        chat_id: i64,
        members: &[NewMember],
        bot_id: i64,
    ) -> Vec<String> {
        let Some(template) = self.groups.active_welcome(chat_id).await else {
            return Vec::new();
        };
        let template = template.as_deref().unwrap_or(DEFAULT_WELCOME);
        members
            .iter()
            .filter(|m| m.user_id != bot_id)
            .map(|m| render_welcome(template, &m.first_name))
            .collect()
    }

    /// Admin list of `chat_id`
    ///
    /// # Errors
    ///
    /// Permission for non-admins, NotFound before `/setup`.
    pub async fn admin_list(&self, actor: &Actor, chat_id: i64) -> Result<String, BotError> {
        self.require_admin(actor.user_id, chat_id).await?;
        let settings = self.group_settings(chat_id).await?;

        let mut text = String::from("👥 Group admins:");
        for admin in &settings.admins {
            match self.relay.display_name(*admin).await {
                Some(name) => {
                    let _ = write!(text, "\n• {name} ({admin})");
                }
                None => {
                    let _ = write!(text, "\n• {admin}");
                }
            }
        }
        Ok(text)
    }

    // --- admin relay ---

    /// Relay `text` to the super-admin and remember where to answer
    ///
    /// # Errors
    ///
    /// Validation for empty text, Permission for ban / rate limit, External
    /// when the admin cannot be reached.
    pub async fn forward_to_admin(&self, actor: &Actor, text: &str) -> Result<String, BotError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BotError::validation("Usage: /admin <message>"));
        }
        self.admit(actor.user_id).await?;

        self.relay
            .record_contact(actor.user_id, actor.name.clone(), actor.chat_id)
            .await;
        let forwarded = format!(
            "📩 New message from {} (ID: {}):\n{text}",
            actor.name, actor.user_id
        );
        self.delivery
            .send_text(self.groups.super_admin(), &forwarded)
            .await?;
        info!(user_id = actor.user_id, "Message forwarded to admin");
        Ok(texts::SENT_TO_ADMIN.to_string())
    }

    /// Answer a user who contacted the admin; `args` is `<user_id> <message>`
    ///
    /// # Errors
    ///
    /// Permission unless the actor is the super-admin, Validation for bad
    /// arguments, NotFound for users without a contact record.
    pub async fn admin_reply(&self, actor: &Actor, args: &str) -> Result<String, BotError> {
        self.require_super_admin(actor.user_id)?;
        let (target, message) = parse_user_and_text(args)
            .ok_or_else(|| BotError::validation("Usage: /reply <user_id> <message>"))?;

        let contact = self
            .relay
            .contact(target)
            .await
            .ok_or_else(|| BotError::not_found(texts::USER_NOT_FOUND))?;
        self.delivery
            .send_text(contact.chat_id, &format!("💌 Admin reply: {message}"))
            .await?;
        Ok(format!("✅ Reply sent to {}!", contact.name))
    }

    /// Add a user to the ban set
    ///
    /// # Errors
    ///
    /// Permission unless the actor is the super-admin, Validation for a bad id.
    pub async fn ban(&self, actor: &Actor, args: &str) -> Result<String, BotError> {
        self.require_super_admin(actor.user_id)?;
        let target = parse_user_id(args).ok_or_else(|| BotError::validation("Usage: /ban <user_id>"))?;
        if target == self.groups.super_admin() {
            return Err(BotError::validation("The admin cannot be banned."));
        }
        Ok(if self.bans.ban(target).await {
            format!("🚫 User {target} banned.")
        } else {
            format!("ℹ️ User {target} is already banned.")
        })
    }

    /// Remove a user from the ban set
    ///
    /// # Errors
    ///
    /// Permission unless the actor is the super-admin, Validation for a bad id.
    pub async fn unban(&self, actor: &Actor, args: &str) -> Result<String, BotError> {
        self.require_super_admin(actor.user_id)?;
        let target =
            parse_user_id(args).ok_or_else(|| BotError::validation("Usage: /unban <user_id>"))?;
        Ok(if self.bans.unban(target).await {
            format!("✅ User {target} unbanned.")
        } else {
            format!("ℹ️ User {target} is not banned.")
        })
    }

    /// Send `text` to every user with a contact record
    ///
    /// # Errors
    ///
    /// Permission unless the actor is the super-admin, Validation for empty
    /// text, NotFound when nobody has written yet.
    pub async fn broadcast(&self, actor: &Actor, text: &str) -> Result<BroadcastReport, BotError> {
        self.require_super_admin(actor.user_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(BotError::validation("Usage: /broadcast <message>"));
        }
        let contacts = self.relay.all_contacts().await;
        if contacts.is_empty() {
            return Err(BotError::not_found("No users to broadcast to yet."));
        }

        let message = format!("📢 {text}");
        let mut report = BroadcastReport {
            delivered: 0,
            failed: 0,
        };
        for (user_id, contact) in contacts {
            match self.delivery.send_text(contact.chat_id, &message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(user_id, error = %e, "Broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }
        info!(delivered = report.delivered, failed = report.failed, "Broadcast finished");
        Ok(report)
    }
}

fn parse_user_id(args: &str) -> Option<i64> {
    args.split_whitespace().next()?.parse().ok()
}

fn parse_user_and_text(args: &str) -> Option<(i64, &str)> {
    let args = args.trim_start();
    let (id, rest) = args.split_once(char::is_whitespace)?;
    let message = rest.trim();
    if message.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, message))
}
