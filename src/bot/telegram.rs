//! [`Delivery`] over the Telegram Bot API.

use crate::bot::resilient::{
    delete_message_resilient, edit_message_resilient, send_audio_resilient,
    send_message_resilient, AudioMeta,
};
use crate::delivery::{Delivery, MediaUpload, StatusHandle};
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

/// Sends queue output through a teloxide [`Bot`]
#[derive(Clone)]
pub struct TelegramDelivery {
    bot: Bot,
}

impl TelegramDelivery {
    /// Wrap `bot`
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        send_message_resilient(&self.bot, ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_status(&self, chat_id: i64, text: &str) -> Result<StatusHandle> {
        let msg = send_message_resilient(&self.bot, ChatId(chat_id), text).await?;
        Ok(StatusHandle {
            chat_id,
            message_id: msg.id.0,
        })
    }

    async fn edit_status(&self, handle: StatusHandle, text: &str) -> Result<()> {
        edit_message_resilient(
            &self.bot,
            ChatId(handle.chat_id),
            MessageId(handle.message_id),
            text,
        )
        .await
    }

    async fn delete_status(&self, handle: StatusHandle) -> Result<()> {
        delete_message_resilient(
            &self.bot,
            ChatId(handle.chat_id),
            MessageId(handle.message_id),
        )
        .await
    }

    async fn send_media(&self, chat_id: i64, media: MediaUpload) -> Result<()> {
        let meta = AudioMeta {
            title: &media.title,
            performer: &media.performer,
            caption: &media.caption,
            duration_secs: media.duration_secs,
        };
        send_audio_resilient(&self.bot, ChatId(chat_id), &media.path, &meta).await?;
        Ok(())
    }
}
