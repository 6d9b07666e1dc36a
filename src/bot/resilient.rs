//! Telegram calls wrapped in retry with exponential backoff.
//!
//! Transient network failures are retried by
//! [`crate::utils::retry_telegram_operation`]; permanent ones surface as
//! `anyhow` errors after the last attempt.

use anyhow::Result;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, Message, MessageId};
use tracing::debug;

/// Telegram's hard message length limit is 4096; leave some headroom
const MAX_MESSAGE_CHARS: usize = 4000;

fn fit_message(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        format!("{}…", crate::utils::truncate_str(text, MAX_MESSAGE_CHARS))
    } else {
        text.to_string()
    }
}

/// Send a plain-text message, retrying transient failures.
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl AsRef<str>,
) -> Result<Message> {
    let text = fit_message(text.as_ref());
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Replace a message's text, retrying transient failures.
///
/// "Message is not modified" counts as success.
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl AsRef<str>,
) -> Result<()> {
    const ERROR_NOT_MODIFIED: &str = "message is not modified";

    let text = fit_message(text.as_ref());
    let result = crate::utils::retry_telegram_operation(|| async {
        bot.edit_message_text(chat_id, msg_id, text.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => {
            debug!("Message update skipped: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete a message, retrying transient failures
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn delete_message_resilient(bot: &Bot, chat_id: ChatId, msg_id: MessageId) -> Result<()> {
    crate::utils::retry_telegram_operation(|| async {
        bot.delete_message(chat_id, msg_id)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram delete error: {e}"))
    })
    .await
}

/// Audio metadata shown by Telegram clients
pub struct AudioMeta<'a> {
    /// Track title
    pub title: &'a str,
    /// Performer line
    pub performer: &'a str,
    /// Caption under the audio
    pub caption: &'a str,
    /// Duration in seconds
    pub duration_secs: Option<u32>,
}

/// Upload a local audio file, retrying transient failures
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn send_audio_resilient(
    bot: &Bot,
    chat_id: ChatId,
    path: &Path,
    meta: &AudioMeta<'_>,
) -> Result<Message> {
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .send_audio(chat_id, InputFile::file(path.to_path_buf()))
            .title(meta.title)
            .performer(meta.performer)
            .caption(meta.caption);
        if let Some(secs) = meta.duration_secs {
            req = req.duration(secs);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram audio upload error: {e}"))
    })
    .await
}
