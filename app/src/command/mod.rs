//! CLI commands, one strategy type per subcommand.

use relay_config::{Config, StorageBackend, StorageConfig};
use relay_conversation::{CompletionPolicy, ConversationService};
use relay_core::{CompletionClient, KeyValueStore};
use relay_providers::GroqProvider;
use relay_store::{FileStore, MemoryStore, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod chat;
mod info;
mod init;
mod telegram;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Contract for every CLI command.
///
/// Each strategy names its own input type, so `main` passes typed
/// arguments and dispatch stays static.
pub trait CommandStrategy: Send + Sync + 'static {
    type Input;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Open the configured key-value backend.
async fn open_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; conversations are lost on exit");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::File => {
            let root = storage.resolved_path()?;
            info!("File store at {}", root.display());
            Arc::new(FileStore::new(root).await?)
        }
        StorageBackend::Sqlite => {
            let path = storage.resolved_path()?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Arc::new(SqliteStore::open(&path).await?)
        }
    };
    Ok(store)
}

fn completion_policy(config: &Config) -> CompletionPolicy {
    CompletionPolicy {
        params: config.sampling_params(),
        retry_budget: config.completion.retry_budget,
        attempt_timeout: Duration::from_secs(config.completion.attempt_timeout_secs),
        prompt_style: config.completion.prompt_style,
        failure_reply: config.completion.failure_reply.clone(),
    }
}

/// Wire storage, provider and policy from `config` into a service.
async fn build_service(config: &Config) -> anyhow::Result<ConversationService> {
    if config.provider.api_key.is_empty() {
        anyhow::bail!(
            "Groq API key not configured. Set \"provider.api_key\" or export {}",
            relay_config::GROQ_API_KEY_ENV
        );
    }

    let store = open_store(&config.storage).await?;
    let client: Arc<dyn CompletionClient> = Arc::new(
        GroqProvider::new(config.provider.api_key.clone())
            .with_base_url(config.provider.base_url.clone()),
    );
    let policy = completion_policy(config);
    info!(
        "Model {} (retry budget {}, {:?} prompts)",
        policy.params.model, policy.retry_budget, policy.prompt_style
    );

    Ok(ConversationService::new(store, client, policy))
}
