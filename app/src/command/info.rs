use relay_config::{Config, StorageBackend};

use super::open_store;

/// Prints the effective configuration with secrets masked, then checks
/// that the storage backend opens.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== relay Configuration ===\n");
        println!("File: {}\n", Config::config_path()?.display());
        println!("{}\n", serde_json::to_string_pretty(&config.redacted())?);

        println!("Storage:");
        match config.storage.backend {
            StorageBackend::Memory => println!("  Backend: memory (not persisted)"),
            backend => println!(
                "  Backend: {backend:?} at {}",
                config.storage.resolved_path()?.display()
            ),
        }
        match open_store(&config.storage).await {
            Ok(_) => println!("  Status: OK"),
            Err(e) => {
                println!("  Status: unavailable");
                println!("  Error: {e}");
            }
        }
        println!();

        println!("Telegram:");
        if config.telegram.token.is_empty() {
            println!("  Token: (not set)");
        }
        if config.telegram.allow_from.is_empty() {
            println!("  Allow From: (empty - all chats allowed)");
        } else {
            println!("  Allow From: {}", config.telegram.allow_from.join(", "));
        }

        Ok(())
    }
}
