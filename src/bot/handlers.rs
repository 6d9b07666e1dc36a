//! Command, message and callback handlers.
//!
//! Handlers translate Telegram updates into [`BotCore`] calls and render
//! the outcome. Errors are rendered with [`BotError::user_message`]; denial
//! notices to banned or rate-limited users go through the [`NoticeCache`].

use crate::bot::resilient::{edit_message_resilient, send_message_resilient};
use crate::bot::views::{self, SettingsAction};
use crate::bot::NoticeCache;
use crate::error::{BotError, Denial};
use crate::groups::Feature;
use crate::service::{Actor, BotCore, NewMember};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{Me, User},
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};

/// Username if set, otherwise first name
fn user_display_name(user: &User) -> String {
    if let Some(ref username) = user.username {
        return username.clone();
    }
    if !user.first_name.is_empty() {
        return user.first_name.clone();
    }
    "Anonymous".to_string()
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Sender and chat of `msg`
#[must_use]
pub fn actor_from_message(msg: &Message) -> Actor {
    let name = msg
        .from
        .as_ref()
        .map_or_else(|| "Anonymous".to_string(), user_display_name);
    Actor::new(get_user_id_safe(msg), msg.chat.id.0, name)
}

/// Supported commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "🎶 Available commands:")]
pub enum Command {
    /// Greeting
    #[command(description = "Start the bot.")]
    Start,
    /// Command list
    #[command(description = "Show this help.")]
    Help,
    /// Queue the best match for a query
    #[command(description = "<song> - queue a song (192kbps).")]
    Play(String),
    /// List matches without queueing
    #[command(description = "<song> - search for songs.")]
    Search(String),
    /// Show the queue
    #[command(description = "show the current queue.")]
    Queue,
    /// Skip the current track
    #[command(description = "skip the current track (requester or admin).")]
    Skip,
    /// Empty the queue
    #[command(description = "clear the queue (admin).")]
    Clear,
    /// Initialize group settings
    #[command(description = "initialize the bot in this group.")]
    Setup,
    /// Settings menu
    #[command(description = "configure this group (admin).")]
    Settings,
    /// Set the welcome template directly
    #[command(description = "<message> - set the welcome message, {name} is the new member.")]
    Welcome(String),
    /// Abort a pending welcome capture
    #[command(description = "cancel setting the welcome message.")]
    Cancel,
    /// Message the admin
    #[command(description = "<message> - contact the admin.")]
    Admin(String),
    /// Answer a user (super-admin)
    #[command(description = "<user_id> <message> - reply to a user (admin only).")]
    Reply(String),
    /// Ban a user (super-admin)
    #[command(description = "<user_id> - ban a user (admin only).")]
    Ban(String),
    /// Unban a user (super-admin)
    #[command(description = "<user_id> - unban a user (admin only).")]
    Unban(String),
    /// Message every known user (super-admin)
    #[command(description = "<message> - send to all users (admin only).")]
    Broadcast(String),
}

/// Render an operation result into `chat_id`.
///
/// Ban and rate-limit notices are sent at most once per cooldown per user.
async fn reply(
    bot: &Bot,
    chat_id: ChatId,
    actor: &Actor,
    notices: &NoticeCache,
    result: Result<String, BotError>,
) -> Result<()> {
    let err = match result {
        Ok(text) => {
            send_message_resilient(bot, chat_id, text).await?;
            return Ok(());
        }
        Err(err) => err,
    };

    match &err {
        BotError::External(e) => {
            warn!(user_id = actor.user_id, chat_id = actor.chat_id, error = %e, "Operation failed");
        }
        other => debug!(user_id = actor.user_id, error = %other, "Operation rejected"),
    }

    let throttled = matches!(
        err,
        BotError::Permission(Denial::Banned | Denial::RateLimited)
    );
    if throttled && !notices.should_send(actor.user_id).await {
        return Ok(());
    }
    send_message_resilient(bot, chat_id, err.user_message()).await?;
    if throttled {
        notices.mark_sent(actor.user_id).await;
    }
    Ok(())
}

/// Dispatch a parsed command
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    core: Arc<BotCore>,
    notices: Arc<NoticeCache>,
) -> Result<()> {
    let actor = actor_from_message(&msg);
    let chat_id = msg.chat.id;
    info!(user_id = actor.user_id, chat_id = actor.chat_id, ?cmd, "Command received");

    let result = match cmd {
        Command::Start => {
            let first_name = msg
                .from
                .as_ref()
                .map_or("there", |u| u.first_name.as_str());
            Ok(views::start_text(first_name))
        }
        Command::Help => Ok(Command::descriptions().to_string()),
        Command::Play(query) => core.play(&actor, &query).await,
        Command::Search(query) => core.search(&actor, &query).await,
        Command::Queue => Ok(core.show_queue().await),
        Command::Skip => core.skip(&actor).await,
        Command::Clear => core.clear(&actor).await,
        Command::Setup => Ok(core.setup(&actor).await),
        Command::Settings => {
            return send_settings_menu(&bot, &msg, &actor, &core, &notices).await;
        }
        Command::Welcome(text) => core.set_welcome(&actor, &text).await,
        Command::Cancel => core.cancel_welcome_capture(&actor).await,
        Command::Admin(text) => core.forward_to_admin(&actor, &text).await,
        Command::Reply(args) => core.admin_reply(&actor, &args).await,
        Command::Ban(args) => core.ban(&actor, &args).await,
        Command::Unban(args) => core.unban(&actor, &args).await,
        Command::Broadcast(text) => core.broadcast(&actor, &text).await.map(|report| {
            format!(
                "📢 Broadcast sent to {} users ({} failed).",
                report.delivered, report.failed
            )
        }),
    };

    reply(&bot, chat_id, &actor, &notices, result).await
}

async fn send_settings_menu(
    bot: &Bot,
    msg: &Message,
    actor: &Actor,
    core: &BotCore,
    notices: &NoticeCache,
) -> Result<()> {
    match core.settings_menu(actor).await {
        Ok(settings) => {
            bot.send_message(msg.chat.id, views::settings_text(&settings))
                .reply_markup(views::settings_keyboard(msg.chat.id.0))
                .await?;
            Ok(())
        }
        Err(err) => reply(bot, msg.chat.id, actor, notices, Err(err)).await,
    }
}

/// Plain (non-command) text: a pending welcome capture takes it first,
/// otherwise private messages are forwarded to the admin.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    core: Arc<BotCore>,
    notices: Arc<NoticeCache>,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let actor = actor_from_message(&msg);

    if let Some(confirmation) = core.capture_welcome_text(&actor, text).await {
        send_message_resilient(&bot, msg.chat.id, confirmation).await?;
        return Ok(());
    }

    if msg.chat.is_private() {
        let result = core.forward_to_admin(&actor, text).await;
        reply(&bot, msg.chat.id, &actor, &notices, result).await?;
    }
    Ok(())
}

/// Greet members who joined a group
///
/// # Errors
///
/// Returns an error if a greeting cannot be sent.
pub async fn handle_new_members(bot: Bot, msg: Message, core: Arc<BotCore>, me: Me) -> Result<()> {
    let Some(users) = msg.new_chat_members() else {
        return Ok(());
    };
    let members: Vec<NewMember> = users
        .iter()
        .map(|u| NewMember {
            user_id: u.id.0.cast_signed(),
            first_name: u.first_name.clone(),
        })
        .collect();

    let greetings = core
        .welcome_new_members(msg.chat.id.0, &members, me.user.id.0.cast_signed())
        .await;
    for greeting in greetings {
        send_message_resilient(&bot, msg.chat.id, greeting).await?;
    }
    Ok(())
}

/// Settings menu buttons; every action is re-authorized against the target chat.
///
/// # Errors
///
/// Returns an error if Telegram API calls fail.
pub async fn handle_settings_callback(bot: Bot, q: CallbackQuery, core: Arc<BotCore>) -> Result<()> {
    let Some((action, chat_id)) = q.data.as_deref().and_then(SettingsAction::parse) else {
        debug!(data = ?q.data, "Ignoring unknown callback");
        ack_callback(&bot, &q).await;
        return Ok(());
    };

    let actor = Actor::new(q.from.id.0.cast_signed(), chat_id, user_display_name(&q.from));
    info!(user_id = actor.user_id, chat_id, ?action, "Settings action");

    let result = match action {
        SettingsAction::ToggleMusic => core.toggle(&actor, chat_id, Feature::Music).await,
        SettingsAction::ToggleWelcome => core.toggle(&actor, chat_id, Feature::Welcome).await,
        SettingsAction::SetWelcome => core.begin_welcome_capture(&actor, chat_id).await,
        SettingsAction::AdminList => core.admin_list(&actor, chat_id).await,
    };

    let text = match result {
        Ok(text) => text,
        Err(err) => {
            bot.answer_callback_query(q.id.clone())
                .text(err.user_message())
                .show_alert(true)
                .await?;
            return Ok(());
        }
    };

    ack_callback(&bot, &q).await;
    match q.message.as_ref() {
        Some(menu) => edit_message_resilient(&bot, menu.chat().id, menu.id(), text).await?,
        None => {
            send_message_resilient(&bot, ChatId(chat_id), text).await?;
        }
    }
    Ok(())
}

/// Stop the button spinner; a stale query is not worth failing the handler over
async fn ack_callback(bot: &Bot, q: &CallbackQuery) {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        debug!(error = %e, "Callback query not answered");
    }
}
