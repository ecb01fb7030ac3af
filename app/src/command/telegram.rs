use crate::command::{CommandStrategy, build_service};
use relay_config::{Config, TELEGRAM_TOKEN_ENV};
use relay_telegram::TelegramBot;
use std::sync::Arc;
use tracing::info;

/// Input for Telegram bot command.
pub struct TelegramInput {
    /// Optional bot token (overrides config)
    pub token: Option<String>,
    /// Optional allowed chat IDs (overrides config)
    pub allow_from: Option<Vec<String>>,
}

/// Strategy for running Telegram bot.
pub struct TelegramStrategy;

impl CommandStrategy for TelegramStrategy {
    type Input = TelegramInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        let token = match input.token {
            Some(t) => t,
            None if !config.telegram.token.is_empty() => config.telegram.token.clone(),
            None => anyhow::bail!(
                "Telegram bot token not configured. Set \"telegram.token\" or export {TELEGRAM_TOKEN_ENV}"
            ),
        };

        let allow_from = input
            .allow_from
            .unwrap_or_else(|| config.telegram.allow_from.clone());

        info!("Starting Telegram bot...");

        let service = Arc::new(build_service(&config).await?);
        let bot = TelegramBot::new(token, service, &allow_from);

        info!("Telegram bot is running. Press Ctrl+C to stop.");
        bot.run().await?;

        Ok(())
    }
}
