//! Dispatcher wiring for the Telegram transport.

use crate::bot::handlers::{self, Command};
use crate::bot::telegram::TelegramDelivery;
use crate::bot::NoticeCache;
use crate::config::{Settings, NOTICE_CACHE_MAX_SIZE, NOTICE_COOLDOWN_SECS};
use crate::groups::JsonFileStore;
use crate::media::YtDlpSource;
use crate::service::BotCore;
use crate::utils::is_command_text;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Me};
use tracing::{error, info};

/// Build the core, start the queue drain and serve updates until Ctrl-C
pub async fn run_bot(settings: &Settings) {
    let bot = Bot::new(settings.telegram_token.clone());

    let core = init_core(settings, bot.clone()).await;
    core.start();

    info!(
        cooldown_secs = NOTICE_COOLDOWN_SECS,
        max_size = NOTICE_CACHE_MAX_SIZE,
        "Initializing NoticeCache"
    );
    let notices = Arc::new(NoticeCache::new(NOTICE_COOLDOWN_SECS, NOTICE_CACHE_MAX_SIZE));

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![core, notices])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn init_core(settings: &Settings, bot: Bot) -> Arc<BotCore> {
    let store = Box::new(JsonFileStore::new(settings.data_file.clone()));
    let source = Arc::new(YtDlpSource::new(settings.ytdlp_path.clone()));
    let delivery = Arc::new(TelegramDelivery::new(bot));

    let core = BotCore::new(settings, store, source, delivery);
    core.load().await;
    info!(data_file = %settings.data_file.display(), "Group settings loaded.");
    Arc::new(core)
}

/// Update routing: callbacks, commands, joins, then plain text
#[must_use]
pub fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.new_chat_members().is_some())
                        .endpoint(handle_new_members),
                )
                .branch(
                    dptree::filter(|msg: Message| {
                        msg.text().is_some_and(|t| !is_command_text(t))
                    })
                    .endpoint(handle_text),
                ),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    core: Arc<BotCore>,
    notices: Arc<NoticeCache>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_command(bot, msg, cmd, core, notices).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    core: Arc<BotCore>,
    notices: Arc<NoticeCache>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg, core, notices).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_new_members(
    bot: Bot,
    msg: Message,
    core: Arc<BotCore>,
    me: Me,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_new_members(bot, msg, core, me).await {
        error!("New member handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    core: Arc<BotCore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_settings_callback(bot, q, core).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
