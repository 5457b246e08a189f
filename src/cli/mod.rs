//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod say;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::core::completion::HttpCompletionGateway;
use crate::core::config::Config;
use crate::core::conversation::{Conversation, ConversationOptions};
use crate::core::message::ConversationId;
use crate::core::runtime::ChatRuntime;
use crate::store::file::FileStore;
use crate::store::{filter_by_title, PersistenceGateway};
use crate::utils::logging;

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "Stream chat completions in the terminal and keep the conversations")]
#[command(
    long_about = "Relaychat talks to an OpenAI-compatible chat completions endpoint, streams \
replies as they arrive, and stores every conversation on disk.\n\n\
Configuration:\n\
  relaychat set base-url https://api.openai.com/v1\n\
  relaychat set model gpt-4o-mini\n\n\
Environment Variables:\n\
  RELAYCHAT_BASE_URL   Base URL used when none is configured\n\
  RELAYCHAT_API_KEY    Bearer credential (takes precedence over the config file)\n\
  RELAYCHAT_LOG        Log filter directives, e.g. relaychat=debug\n\n\
Chat commands:\n\
  /regenerate       Replace the last reply\n\
  /new              Start a new conversation\n\
  /rename <title>   Rename the current conversation\n\
  /history          Print the transcript\n\
  /quit             Leave the chat\n\
  Ctrl+C            Cancel the reply being streamed"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug diagnostics to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat {
        /// Continue an existing conversation
        #[arg(short = 'c', long, value_name = "ID")]
        conversation: Option<String>,
    },
    /// Send one prompt in a new conversation and print the reply
    Say {
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// List conversations, most recently updated first
    List {
        /// Only show conversations whose title contains this text
        #[arg(short = 's', long)]
        search: Option<String>,
    },
    /// Rename a conversation
    Rename {
        id: String,
        #[arg(trailing_var_arg = true, required = true)]
        title: Vec<String>,
    },
    /// Delete a conversation and its messages
    Delete { id: String },
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;

    match args.command.unwrap_or(Commands::Chat { conversation: None }) {
        Commands::Chat { conversation } => {
            let conversation = conversation.as_deref().map(parse_id).transpose()?;
            run_chat(build_runtime(&config)?, conversation).await
        }
        Commands::Say { prompt } => run_say(build_runtime(&config)?, &prompt.join(" ")).await,
        Commands::List { search } => {
            let store = open_store(&config)?;
            let records = store.list_conversations(&config.owner_or_default()).await?;
            let records = match search.as_deref() {
                Some(query) => filter_by_title(records, query),
                None => records,
            };
            if records.is_empty() {
                println!("No conversations.");
            }
            for record in records {
                println!(
                    "{}  {}  {}",
                    record.id,
                    record.updated_at.format("%Y-%m-%d %H:%M"),
                    record.title
                );
            }
            Ok(())
        }
        Commands::Rename { id, title } => {
            let id = parse_id(&id)?;
            let store = open_store(&config)?;
            store.rename_conversation(&id, &title.join(" ")).await?;
            println!("✅ Renamed {id}");
            Ok(())
        }
        Commands::Delete { id } => {
            let id = parse_id(&id)?;
            let store = open_store(&config)?;
            store.delete_conversation(&id).await?;
            println!("✅ Deleted {id}");
            Ok(())
        }
        Commands::Set { key, value } => {
            let value = value.join(" ");
            config.set_value(&key, &value)?;
            config.save_to_path(&config_path)?;
            println!("✅ Set {key}");
            Ok(())
        }
        Commands::Unset { key } => {
            config.unset_value(&key)?;
            config.save_to_path(&config_path)?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Commands::Config => {
            config.print_all();
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> Result<ConversationId, Box<dyn Error>> {
    raw.trim()
        .parse()
        .map_err(|err| format!("invalid conversation id '{raw}': {err}").into())
}

fn open_store(config: &Config) -> Result<Arc<FileStore>, Box<dyn Error>> {
    let dir = config
        .data_dir
        .clone()
        .or_else(FileStore::default_dir)
        .ok_or("could not determine a data directory; run `relaychat set data-dir <path>`")?;
    Ok(Arc::new(FileStore::new(dir)))
}

fn build_runtime(config: &Config) -> Result<ChatRuntime, Box<dyn Error>> {
    let resolved = config.resolve()?;
    let client = HttpCompletionGateway::build_client(resolved.connect_timeout)?;
    let gateway = HttpCompletionGateway::new(
        client,
        resolved.endpoint,
        resolved.api_key,
        resolved.model,
    );
    let conversation = Conversation::new(
        open_store(config)?,
        ConversationOptions {
            owner: resolved.owner,
            persist_partial_responses: resolved.persist_partial_responses,
        },
    );
    Ok(ChatRuntime::new(conversation, Arc::new(gateway)))
}
