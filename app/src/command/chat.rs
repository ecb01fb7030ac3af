//! Terminal front-end over the same command surface as the Telegram bot.

use relay_config::Config;
use relay_conversation::ConversationService;
use relay_core::ConversationId;
use relay_telegram::{Command, execute};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::build_service;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Conversation to read and write
    pub conversation: String,
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

/// Plain text is a chat turn; slash commands behave as in Telegram.
async fn run_line(
    service: &ConversationService,
    id: &ConversationId,
    line: &str,
) -> anyhow::Result<String> {
    let cmd = Command::parse_from_text(line).unwrap_or_else(|| Command::Chat(line.to_string()));
    Ok(execute(service, id, cmd).await?)
}

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let service = build_service(&config).await?;
        let id = ConversationId::new(input.conversation)?;

        if let Some(msg) = input.message {
            println!("{}", run_line(&service, &id, &msg).await?);
            return Ok(());
        }

        println!("=== Conversation: {id} ===");
        println!("Type /help for commands, 'exit' or Ctrl+D to leave.\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if matches!(line, "exit" | "quit" | "q") {
                break;
            }
            if line.is_empty() {
                continue;
            }

            match run_line(&service, &id, line).await {
                Ok(reply) => println!("\n{reply}\n"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }

        info!("Conversation {id} ended");
        Ok(())
    }
}
