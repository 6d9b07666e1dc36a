//! Static texts, the settings keyboard and its callback data.

use crate::groups::GroupSettings;
use crate::welcome::NAME_PLACEHOLDER;
use lazy_regex::regex_captures;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Greeting for `/start`
#[must_use]
pub fn start_text(first_name: &str) -> String {
    format!(
        "🎵 Hello {first_name}! I'm Muskan Music Bot!\n\
         Use /play <song> to queue a track and /help to see every command."
    )
}

/// Text above the settings keyboard
#[must_use]
pub fn settings_text(settings: &GroupSettings) -> String {
    format!(
        "⚙️ Group Settings:\n\n🎵 Music: {}\n👋 Welcome messages: {}\n\nWelcome templates can use {NAME_PLACEHOLDER}.",
        on_off(settings.music_enabled),
        on_off(settings.welcome_enabled)
    )
}

const fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// Buttons of the settings menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    /// Flip `music_enabled`
    ToggleMusic,
    /// Flip `welcome_enabled`
    ToggleWelcome,
    /// Start the welcome capture
    SetWelcome,
    /// Show the admin list
    AdminList,
}

impl SettingsAction {
    const fn tag(self) -> &'static str {
        match self {
            Self::ToggleMusic => "toggle_music",
            Self::ToggleWelcome => "toggle_welcome",
            Self::SetWelcome => "set_welcome",
            Self::AdminList => "admin_list",
        }
    }

    /// Callback data for this action on `chat_id`
    #[must_use]
    pub fn callback_data(self, chat_id: i64) -> String {
        format!("{}:{chat_id}", self.tag())
    }

    /// Parse `action:chat_id` callback data
    ///
    /// # Examples
    ///
    /// ```
    /// use muskan_bot::bot::views::SettingsAction;
    ///
    /// let data = SettingsAction::SetWelcome.callback_data(-100123);
    /// assert_eq!(SettingsAction::parse(&data), Some((SettingsAction::SetWelcome, -100123)));
    /// assert_eq!(SettingsAction::parse("bogus"), None);
    /// ```
    #[must_use]
    pub fn parse(data: &str) -> Option<(Self, i64)> {
        let (_, tag, chat_id) = regex_captures!(
            r"^(toggle_music|toggle_welcome|set_welcome|admin_list):(-?\d+)$",
            data
        )?;
        let action = match tag {
            "toggle_music" => Self::ToggleMusic,
            "toggle_welcome" => Self::ToggleWelcome,
            "set_welcome" => Self::SetWelcome,
            _ => Self::AdminList,
        };
        Some((action, chat_id.parse().ok()?))
    }
}

/// Inline keyboard of the settings menu for `chat_id`
#[must_use]
pub fn settings_keyboard(chat_id: i64) -> InlineKeyboardMarkup {
    let button = |label: &str, action: SettingsAction| {
        vec![InlineKeyboardButton::callback(
            label.to_string(),
            action.callback_data(chat_id),
        )]
    };
    InlineKeyboardMarkup::new(vec![
        button("🎵 Toggle Music", SettingsAction::ToggleMusic),
        button("👋 Toggle Welcome", SettingsAction::ToggleWelcome),
        button("✍️ Set Welcome", SettingsAction::SetWelcome),
        button("👥 Admin List", SettingsAction::AdminList),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_data_parses_back() {
        for action in [
            SettingsAction::ToggleMusic,
            SettingsAction::ToggleWelcome,
            SettingsAction::SetWelcome,
            SettingsAction::AdminList,
        ] {
            assert_eq!(
                SettingsAction::parse(&action.callback_data(-1001)),
                Some((action, -1001))
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed_data() {
        assert_eq!(SettingsAction::parse("toggle_music:"), None);
        assert_eq!(SettingsAction::parse("toggle_music:12x"), None);
        assert_eq!(SettingsAction::parse("delete_all:5"), None);
        // Larger than i64
        assert_eq!(SettingsAction::parse("admin_list:99999999999999999999"), None);
    }

    #[test]
    fn test_settings_keyboard_has_four_rows() {
        let keyboard = settings_keyboard(7);
        assert_eq!(keyboard.inline_keyboard.len(), 4);
    }

    #[test]
    fn test_settings_text_shows_flags() {
        let settings = GroupSettings {
            admins: vec![1],
            music_enabled: true,
            welcome_enabled: false,
        };
        let text = settings_text(&settings);
        assert!(text.contains("Music: ON"));
        assert!(text.contains("Welcome messages: OFF"));
    }
}
