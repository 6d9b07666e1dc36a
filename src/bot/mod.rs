/// Command, message and callback handlers
pub mod handlers;
/// Cooldown for repeated denial notices
pub mod notice_cache;
/// Retrying wrappers around Telegram API calls
pub mod resilient;
/// Dispatcher setup and bot entry point
pub mod runner;
/// Telegram implementation of the delivery collaborator
pub mod telegram;
/// Texts and keyboards
pub mod views;

pub use notice_cache::NoticeCache;
pub use runner::run_bot;
pub use telegram::TelegramDelivery;
