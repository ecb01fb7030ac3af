use relay_core::{PromptStyle, SamplingParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_DIR: &str = "relay";
const CONFIG_FILE: &str = "config.json";

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "ProviderConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ProviderConfig::default_model")]
    pub model: String,
}

impl ProviderConfig {
    fn default_base_url() -> String {
        "https://api.groq.com/openai/v1".to_string()
    }

    fn default_model() -> String {
        SamplingParams::default().model
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "CompletionConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "CompletionConfig::default_top_p")]
    pub top_p: f32,
    #[serde(default = "CompletionConfig::default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "CompletionConfig::default_stream")]
    pub stream: bool,
    /// Total completion attempts per chat turn.
    #[serde(default = "CompletionConfig::default_retry_budget")]
    pub retry_budget: u32,
    /// Upper bound on a single completion attempt.
    #[serde(default = "CompletionConfig::default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default)]
    pub prompt_style: PromptStyle,
    /// Reply shown when every attempt failed.
    #[serde(default = "CompletionConfig::default_failure_reply")]
    pub failure_reply: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            temperature: Self::default_temperature(),
            top_p: Self::default_top_p(),
            max_tokens: Self::default_max_tokens(),
            stream: Self::default_stream(),
            retry_budget: Self::default_retry_budget(),
            attempt_timeout_secs: Self::default_attempt_timeout_secs(),
            prompt_style: PromptStyle::default(),
            failure_reply: Self::default_failure_reply(),
        }
    }
}

impl CompletionConfig {
    const fn default_temperature() -> f32 {
        1.0
    }

    const fn default_top_p() -> f32 {
        1.0
    }

    const fn default_max_tokens() -> usize {
        1024
    }

    const fn default_stream() -> bool {
        true
    }

    const fn default_retry_budget() -> u32 {
        3
    }

    const fn default_attempt_timeout_secs() -> u64 {
        60
    }

    fn default_failure_reply() -> String {
        ":(".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Store directory (`file`) or database file (`sqlite`). Defaults to
    /// `~/relay/store` or `~/relay/relay.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dir = Config::config_dir()?;
        Ok(match self.backend {
            StorageBackend::Sqlite => dir.join("relay.db"),
            StorageBackend::File | StorageBackend::Memory => dir.join("store"),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// Chat ids allowed to use the bot; empty allows everyone.
    #[serde(default)]
    pub allow_from: Vec<String>,
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Load `~/relay/config.json`, apply environment overrides and validate.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'relay init' to create config.",
                config_path.display()
            );
        }

        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        info!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(key) = lookup(GROQ_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.provider.api_key = key;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.completion.retry_budget == 0 {
            anyhow::bail!("completion.retry_budget must be at least 1");
        }
        if self.completion.max_tokens == 0 {
            anyhow::bail!("completion.max_tokens must be at least 1");
        }
        if self.completion.attempt_timeout_secs == 0 {
            anyhow::bail!("completion.attempt_timeout_secs must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            model: self.provider.model.clone(),
            temperature: self.completion.temperature,
            top_p: self.completion.top_p,
            max_tokens: self.completion.max_tokens,
            stream: self.completion.stream,
        }
    }

    /// Copy with secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        fn mask(secret: &str) -> String {
            if secret.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        }

        let mut config = self.clone();
        config.provider.api_key = mask(&config.provider.api_key);
        config.telegram.token = mask(&config.telegram.token);
        config
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Add your Groq API key (or export {GROQ_API_KEY_ENV})");
        println!("   2. Add your Telegram bot token (or export {TELEGRAM_TOKEN_ENV})");
        println!("   3. Run 'relay chat' to try it locally, or 'relay telegram' to start the bot");
        println!();
        println!("🔧 Configuration options:");
        println!("   - completion.retry_budget: completion attempts per chat turn");
        println!("   - completion.prompt_style: conversational or embedded_history");
        println!("   - storage.backend: file, sqlite or memory");
        println!();
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "provider": {
    "api_key": "your-groq-api-key-here",
    "base_url": "https://api.groq.com/openai/v1",
    "model": "llama-3.1-70b-versatile"
  },
  "completion": {
    "temperature": 1.0,
    "top_p": 1.0,
    "max_tokens": 1024,
    "stream": true,
    "retry_budget": 3,
    "attempt_timeout_secs": 60,
    "prompt_style": "conversational",
    "failure_reply": ":("
  },
  "storage": {
    "backend": "file"
  },
  "telegram": {
    "token": "your-telegram-bot-token-here",
    "allow_from": []
  }
}"#;
