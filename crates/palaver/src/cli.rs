//! Command line and environment configuration.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use palaver::{AppState, DEFAULT_SYSTEM_PROMPT};
use palaver_core::{
    Completer, CompleterBuilder, Conversation, ConversationId, MemoryStore,
    TurnStore,
};
use palaver_gemini_model::{GeminiConfigBuilder, GeminiProvider};
use palaver_store::SqliteStore;

/// A chat service relaying conversations to Gemini.
#[derive(Parser, Debug)]
#[command(name = "palaver", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (the default).
    Serve,
    /// Chat in the terminal against the same conversation.
    Chat,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on.
    #[arg(long, env = "PALAVER_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Conversation the turns are read from and written to.
    #[arg(long, env = "PALAVER_CONVERSATION", default_value = "default")]
    pub conversation: String,

    /// File whose content replaces the built-in system instruction.
    #[arg(long, env = "PALAVER_SYSTEM_PROMPT")]
    pub system_prompt: Option<PathBuf>,

    /// Seconds the model service may take to accept a request.
    #[arg(long, env = "PALAVER_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    #[command(flatten)]
    pub gemini: GeminiArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug, Clone)]
#[command(next_help_heading = "Model")]
pub struct GeminiArgs {
    #[arg(
        id = "gemini-api-key",
        long,
        env = "GEMINI_API_KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,

    #[arg(id = "gemini-model", long, env = "GEMINI_MODEL")]
    pub model: Option<String>,

    #[arg(id = "gemini-base-url", long, env = "GEMINI_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    /// Keep turns in memory; they are lost on exit.
    Memory,
}

#[derive(Args, Debug, Clone)]
#[command(next_help_heading = "Storage")]
pub struct StoreArgs {
    #[arg(
        id = "store",
        long,
        env = "PALAVER_STORE",
        value_enum,
        default_value_t = StoreKind::Sqlite
    )]
    pub kind: StoreKind,

    /// SQLite database file.
    #[arg(id = "database", long, env = "PALAVER_DATABASE", default_value = "palaver.db")]
    pub database: PathBuf,
}

impl Config {
    /// Wires the store, the conversation and the model provider together.
    pub fn build_state(&self) -> Result<AppState, Box<dyn Error>> {
        let conversation = Conversation::new(
            self.open_store()?,
            ConversationId::new(self.conversation.clone()),
        );
        Ok(AppState::new(conversation, self.build_completer()?))
    }

    fn open_store(&self) -> Result<Arc<dyn TurnStore>, Box<dyn Error>> {
        Ok(match self.store.kind {
            StoreKind::Sqlite => Arc::new(SqliteStore::open(&self.store.database)?),
            StoreKind::Memory => {
                warn!("using the in-memory store, history is lost on exit");
                Arc::new(MemoryStore::new())
            }
        })
    }

    fn build_completer(&self) -> Result<Completer, Box<dyn Error>> {
        let Some(api_key) = &self.gemini.api_key else {
            return Err("GEMINI_API_KEY environment variable is not set".into());
        };
        let mut builder = GeminiConfigBuilder::with_api_key(api_key);
        if let Some(model) = &self.gemini.model {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = &self.gemini.base_url {
            builder = builder.with_base_url(base_url);
        }
        let provider = GeminiProvider::new(builder.build())?;

        let system_prompt = match &self.system_prompt {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                format!("failed to read {}: {e}", path.display())
            })?,
            None => DEFAULT_SYSTEM_PROMPT.to_owned(),
        };

        Ok(CompleterBuilder::with_model_provider(provider)
            .with_system_instruction(system_prompt.trim())
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .build())
    }
}
