//! Delivery collaborator: how the core talks back to conversations.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// A sent status message that can later be edited or deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHandle {
    /// Chat holding the message
    pub chat_id: i64,
    /// Message id inside that chat
    pub message_id: i32,
}

/// Audio file plus the metadata shown by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    /// Local file to upload
    pub path: PathBuf,
    /// Track title
    pub title: String,
    /// Performer line
    pub performer: String,
    /// Duration in seconds, when known
    pub duration_secs: Option<u32>,
    /// Caption identifying the requester
    pub caption: String,
}

/// Outbound side of the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Send a status notification that can be edited later
    async fn send_status(&self, chat_id: i64, text: &str) -> Result<StatusHandle>;

    /// Replace a status notification's text
    async fn edit_status(&self, handle: StatusHandle, text: &str) -> Result<()>;

    /// Remove a status notification
    async fn delete_status(&self, handle: StatusHandle) -> Result<()>;

    /// Upload an audio file
    async fn send_media(&self, chat_id: i64, media: MediaUpload) -> Result<()>;
}
