use crate::{Command, Result};
use relay_conversation::ConversationService;
use std::{sync::Arc, time::Duration};
use teloxide::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};

/// Telegram front-end over a [`ConversationService`].
#[derive(Clone)]
pub struct TelegramBot {
    /// Teloxide bot instance
    pub bot: Bot,
    pub service: Arc<ConversationService>,
    /// Allowed chat IDs; empty means everyone
    allowed_chats: Vec<i64>,
}

impl TelegramBot {
    #[must_use]
    pub fn new(token: String, service: Arc<ConversationService>, allowed_chats: &[String]) -> Self {
        let allowed_chats = allowed_chats
            .iter()
            .filter_map(|s| match s.trim().parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring invalid chat id in allow_from: {s:?}");
                    None
                }
            })
            .collect();

        Self {
            bot: Bot::new(token),
            service,
            allowed_chats,
        }
    }

    /// Check if a chat is allowed
    #[must_use]
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    /// Probe the Telegram API until it answers.
    /// Delay grows by 2s per attempt, capped at 10s.
    async fn test_connection(&self) {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(me) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        me.user
                            .username
                            .clone()
                            .unwrap_or_else(|| "no username".to_string()),
                        me.user.id
                    );
                    return;
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);
                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");

                    if attempt == 1 {
                        warn!("Check network access to api.telegram.org and the bot token");
                    }

                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the bot
    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        self.test_connection().await;

        self.bot.set_my_commands(Command::bot_commands()).await?;
        info!("Registered {} bot commands", Command::bot_commands().len());

        let bot = self.bot.clone();

        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let relay = self.clone();
            move |msg: Message| {
                let relay = relay.clone();
                async move { crate::handler::handle_message(relay, msg).await }
            }
        }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}
