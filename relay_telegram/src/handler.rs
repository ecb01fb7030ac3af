use crate::{Command, Error, Result, TelegramBot};
use relay_conversation::{CheckpointLoad, ConversationError, ConversationService};
use relay_core::{ConversationId, StoreError, TELEGRAM_MESSAGE_LIMIT, split_message};
use teloxide::prelude::*;
use teloxide::types::Message;
use tracing::{error, info, warn};

const INVALID_CHECKPOINT_NAME: &str =
    "Checkpoint names may only use letters, digits, '-' and '_' (up to 64 characters).";

/// Run `cmd` against the conversation and produce the reply text.
///
/// Bad arguments become usage hints; only storage failures are errors.
pub async fn execute(
    service: &ConversationService,
    id: &ConversationId,
    cmd: Command,
) -> std::result::Result<String, ConversationError> {
    let reply = match cmd {
        Command::Start => Command::welcome_text().to_string(),
        Command::Help => Command::help_text().to_string(),
        Command::Unknown(name) => format!("Unknown command /{name}. Send /help for the list."),
        Command::Context(context) if context.is_empty() => {
            "Usage: /context <scenario description>".to_string()
        }
        Command::Context(context) => {
            service.set_context(id, &context).await?;
            format!("Context set to {context}.")
        }
        Command::Length(arg) => match arg.parse::<usize>() {
            Ok(size) if size > 0 => {
                service.set_window_size(id, size).await?;
                format!("Context window size set to {size}.")
            }
            _ => "Usage: /length <positive number>".to_string(),
        },
        Command::Chat(text) if text.is_empty() => "Usage: /g <message>".to_string(),
        Command::Chat(text) => service.chat(id, &text).await,
        Command::History => service.history_json(id).await?,
        Command::Save(name) if name.is_empty() => "Usage: /save <name>".to_string(),
        Command::Save(name) => match service.save_checkpoint(id, &name).await {
            Ok(_) => format!("Checkpoint saved as {name}."),
            Err(ConversationError::Store(StoreError::InvalidCheckpointName(_))) => {
                INVALID_CHECKPOINT_NAME.to_string()
            }
            Err(e) => return Err(e),
        },
        Command::Load(name) if name.is_empty() => "Usage: /load <name>".to_string(),
        Command::Load(name) => match service.load_checkpoint(id, &name).await {
            Ok(CheckpointLoad::Restored { .. }) => format!("Checkpoint loaded from {name}."),
            Ok(CheckpointLoad::NotFound) => format!("Checkpoint {name} not found."),
            Err(ConversationError::Store(StoreError::InvalidCheckpointName(_))) => {
                INVALID_CHECKPOINT_NAME.to_string()
            }
            Err(e) => return Err(e),
        },
        Command::Undo => match service.undo(id).await? {
            CheckpointLoad::Restored { .. } => "Last message undone.".to_string(),
            CheckpointLoad::NotFound => "No messages to undo.".to_string(),
        },
        Command::Clear => {
            service.clear_history(id).await?;
            "History cleared.".to_string()
        }
    };
    Ok(reply)
}

/// Send `text` in order, split at the Telegram message limit.
async fn send_chunked(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    for chunk in split_message(text, TELEGRAM_MESSAGE_LIMIT) {
        bot.send_message(chat_id, chunk).await?;
    }
    Ok(())
}

/// Handle bot commands
pub async fn handle_command(bot: TelegramBot, msg: Message, cmd: Command) -> Result<()> {
    let id = ConversationId::from(msg.chat.id.0);
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");

    info!("[@{username}] Command: {cmd:?}");

    let status = match cmd.status_text() {
        Some(text) => Some(bot.bot.send_message(msg.chat.id, text).await?),
        None => None,
    };

    let outcome = match execute(&bot.service, &id, cmd).await {
        Ok(reply) => {
            info!("[@{username}] Reply: {} chars", reply.chars().count());
            send_chunked(&bot.bot, msg.chat.id, &reply).await
        }
        Err(e) => {
            error!("[@{username}] Command failed: {e}");
            bot.bot
                .send_message(msg.chat.id, "Something went wrong, please try again.")
                .await?;
            Err(e.into())
        }
    };

    if let Some(status) = status {
        if let Err(e) = bot.bot.delete_message(msg.chat.id, status.id).await {
            warn!("Failed to delete status message: {e}");
        }
    }

    outcome
}

/// Handle any message (commands or regular text)
pub async fn handle_message(bot: TelegramBot, msg: Message) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;

    if !bot.is_allowed(chat_id) {
        warn!("Refusing message from chat {chat_id}");
        bot.bot
            .send_message(msg.chat.id, "This chat is not allowed to use this bot.")
            .await?;
        return Err(Error::Unauthorized(chat_id));
    }

    let cmd = Command::parse_from_text(text).unwrap_or_else(|| Command::Chat(text.to_string()));
    handle_command(bot, msg, cmd).await
}
