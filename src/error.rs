//! Error taxonomy for chat operations.
//!
//! Every variant is recoverable: handlers convert it into a reply with
//! [`BotError::user_message`] and keep serving.

use thiserror::Error;

/// Reason an action was refused before it consumed any resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// User is in the ban set
    Banned,
    /// User is over the rate limit
    RateLimited,
    /// User is not an admin of the conversation
    NotAdmin,
    /// Only the super-admin may do this
    SuperAdminOnly,
    /// Music is switched off for the group
    MusicDisabled,
    /// Skip attempted by someone who neither requested the item nor administers the chat
    NotRequester,
}

/// Errors surfaced by [`crate::service::BotCore`] operations
#[derive(Error, Debug)]
pub enum BotError {
    /// Bad or missing arguments
    #[error("validation error: {0}")]
    Validation(String),
    /// Ban, rate limit, missing privileges or disabled feature
    #[error("permission denied: {0:?}")]
    Permission(Denial),
    /// Nothing matched (search results, relay target, group settings)
    #[error("not found: {0}")]
    NotFound(String),
    /// A duration, size or capacity ceiling was exceeded
    #[error("resource limit: {0}")]
    ResourceLimit(String),
    /// A search, extraction or delivery collaborator failed
    #[error("external error: {0}")]
    External(#[from] anyhow::Error),
}

impl BotError {
    /// Text shown to the user for this error.
    ///
    /// External failures are rendered generically; the detail only goes to the log.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Permission(denial) => match denial {
                Denial::Banned => "🚫 You are banned from using this bot.".to_string(),
                Denial::RateLimited => "⏳ Slow down! Try again in a moment.".to_string(),
                Denial::NotAdmin => "❌ Only group admins can do that.".to_string(),
                Denial::SuperAdminOnly => "❌ Admin only command!".to_string(),
                Denial::MusicDisabled => "❌ Music is disabled in this group".to_string(),
                Denial::NotRequester => {
                    "❌ Only the requester or a group admin can skip this track.".to_string()
                }
            },
            Self::NotFound(msg) | Self::ResourceLimit(msg) => format!("❌ {msg}"),
            Self::External(_) => "❌ Something went wrong, please try again later.".to_string(),
        }
    }

    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Shorthand for a resource-limit error
    pub fn resource_limit(msg: impl Into<String>) -> Self {
        Self::ResourceLimit(msg.into())
    }
}

impl From<Denial> for BotError {
    fn from(denial: Denial) -> Self {
        Self::Permission(denial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_errors_hide_details() {
        let err = BotError::External(anyhow::anyhow!("token=secret connection refused"));
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn permission_messages_are_specific() {
        assert_eq!(
            BotError::from(Denial::MusicDisabled).user_message(),
            "❌ Music is disabled in this group"
        );
        assert!(BotError::from(Denial::Banned).user_message().contains("banned"));
    }
}
