use crate::bot::handlers::{message_to_event, Command};
use crate::bot::TelegramTransport;
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use teletweet_core::config::{Settings, SettingsStore};
use teletweet_core::twitter::{Consumer, SocialPlatform, TwitterApi};
use teletweet_core::Relay;
use tracing::{debug, info, warn};

/// Run the Telegram transport runtime until ctrl-c.
///
/// # Errors
///
/// Returns an error if the Twitter client cannot be built.
pub async fn run_bot(settings: Arc<SettingsStore>) -> Result<()> {
    let snapshot = settings.snapshot().await;
    let platform = init_platform(&snapshot)?;

    let bot = Bot::new(snapshot.telegram.token.clone());
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let relay = Arc::new(Relay::new(transport, platform, settings).await);
    info!("Relay initialized.");

    if let Err(e) = register_commands(&bot).await {
        warn!("{e:#}");
    }
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

fn init_platform(settings: &Settings) -> Result<Arc<dyn SocialPlatform>> {
    let consumer = Consumer {
        key: settings.twitter.consumer_key.clone(),
        secret: settings.twitter.consumer_secret.clone(),
    };
    let api = TwitterApi::new(consumer).context("Failed to initialize Twitter client")?;
    info!("Twitter client initialized.");
    Ok(Arc::new(api))
}

async fn register_commands(bot: &Bot) -> Result<()> {
    bot.set_my_commands(Command::bot_commands())
        .await
        .context("Failed to register bot commands")?;
    Ok(())
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry().branch(Update::filter_message().endpoint(handle_message))
}

async fn handle_message(msg: Message, relay: Arc<Relay>) -> Result<(), teloxide::RequestError> {
    debug!(chat_id = msg.chat.id.0, message_id = msg.id.0, "Inbound message");
    relay.handle_event(message_to_event(&msg)).await;
    respond(())
}
