use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::io::ConfigError;
use crate::core::constants::DEFAULT_OWNER;
use crate::utils::url::construct_api_url;

pub const ENV_BASE_URL: &str = "RELAYCHAT_BASE_URL";
pub const ENV_API_KEY: &str = "RELAYCHAT_API_KEY";
pub const DEFAULT_CHAT_PATH: &str = "chat/completions";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the completion service
    pub base_url: Option<String>,
    /// Path appended to `base_url`; set to "" when `base_url` is already the full endpoint
    pub chat_path: Option<String>,
    /// Bearer credential. `RELAYCHAT_API_KEY` takes precedence
    pub api_key: Option<String>,
    /// Model name; when set the request also asks for `stream: true`
    pub model: Option<String>,
    /// Owner recorded on new conversations
    pub owner: Option<String>,
    /// Directory holding conversation documents
    pub data_dir: Option<PathBuf>,
    /// Persist partial assistant text when a stream fails or is cancelled
    pub persist_partial_responses: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
}

/// Configuration with defaults and environment overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub owner: String,
    pub data_dir: Option<PathBuf>,
    pub persist_partial_responses: bool,
    pub connect_timeout: Option<Duration>,
}

impl Config {
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolves against an explicit environment lookup.
    pub fn resolve_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ConfigError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let base_url = non_empty(self.base_url.clone())
            .or_else(|| non_empty(env(ENV_BASE_URL)))
            .ok_or(ConfigError::MissingBaseUrl)?;
        let chat_path = self.chat_path.as_deref().unwrap_or(DEFAULT_CHAT_PATH);

        Ok(ResolvedConfig {
            endpoint: construct_api_url(base_url.trim(), chat_path),
            api_key: non_empty(env(ENV_API_KEY)).or_else(|| non_empty(self.api_key.clone())),
            model: non_empty(self.model.clone()),
            owner: self.owner_or_default(),
            data_dir: self.data_dir.clone(),
            persist_partial_responses: self.persist_partial_responses.unwrap_or(false),
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn owner_or_default(&self) -> String {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .unwrap_or(DEFAULT_OWNER)
            .to_string()
    }

    /// Sets one key from its command-line spelling.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim().to_string();
        match key {
            "base-url" => self.base_url = Some(value),
            "chat-path" => self.chat_path = Some(value),
            "api-key" => self.api_key = Some(value),
            "model" => self.model = Some(value),
            "owner" => self.owner = Some(value),
            "data-dir" => self.data_dir = Some(PathBuf::from(value)),
            "persist-partial-responses" => {
                let flag = value
                    .parse::<bool>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.clone(),
                    })?;
                self.persist_partial_responses = Some(flag);
            }
            "connect-timeout-secs" => {
                let secs = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                })?;
                self.connect_timeout_secs = Some(secs);
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), ConfigError> {
        match key {
            "base-url" => self.base_url = None,
            "chat-path" => self.chat_path = None,
            "api-key" => self.api_key = None,
            "model" => self.model = None,
            "owner" => self.owner = None,
            "data-dir" => self.data_dir = None,
            "persist-partial-responses" => self.persist_partial_responses = None,
            "connect-timeout-secs" => self.connect_timeout_secs = None,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn print_all(&self) {
        let show = |value: Option<String>| value.unwrap_or_else(|| "(unset)".to_string());
        println!("base-url: {}", show(self.base_url.clone()));
        println!("chat-path: {}", show(self.chat_path.clone()));
        println!(
            "api-key: {}",
            if self.api_key.is_some() { "(set)" } else { "(unset)" }
        );
        println!("model: {}", show(self.model.clone()));
        println!("owner: {}", show(self.owner.clone()));
        println!(
            "data-dir: {}",
            show(self.data_dir.as_deref().map(path_display))
        );
        println!(
            "persist-partial-responses: {}",
            show(self.persist_partial_responses.map(|v| v.to_string()))
        );
        println!(
            "connect-timeout-secs: {}",
            show(self.connect_timeout_secs.map(|v| v.to_string()))
        );
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
