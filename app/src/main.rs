#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use clap::{Parser, Subcommand};
use command::{
    ChatInput, ChatStrategy, CommandStrategy, InfoStrategy, InitStrategy, TelegramInput,
    TelegramStrategy, VersionStrategy,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Role-play chat relay with checkpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Init,
    /// Show version
    Version,
    /// Show the effective configuration
    Info,
    /// Chat from the terminal
    Chat {
        /// Conversation to use
        #[arg(short = 'c', long, default_value = "cli-default")]
        conversation: String,

        /// Single message to send
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Run the Telegram bot
    Telegram {
        /// Bot token (overrides config)
        #[arg(long)]
        token: Option<String>,

        /// Allowed chat ids (overrides config)
        #[arg(long, value_delimiter = ',')]
        allow_from: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
        Commands::Info => InfoStrategy.execute(()).await,
        Commands::Chat {
            conversation,
            message,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    conversation,
                    message,
                })
                .await
        }
        Commands::Telegram { token, allow_from } => {
            TelegramStrategy
                .execute(TelegramInput { token, allow_from })
                .await
        }
    }
}
