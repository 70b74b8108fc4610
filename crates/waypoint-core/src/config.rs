//! Configuration management for Waypoint
//!
//! Handles loading and saving the application configuration: the fallback
//! chat mode, the workspace root, and per-provider model capabilities. The
//! session core reads it through [`SettingsProvider`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Setting key of the fallback chat mode
pub const INPUT_CHAT_MODE: &str = "input_chatMode";

/// Config collaborator consumed by the session core
pub trait SettingsProvider: Send + Sync {
    /// Look up a scalar setting by key (e.g. [`INPUT_CHAT_MODE`])
    fn get_setting(&self, key: &str) -> Option<String>;

    /// Default capabilities of a model; `None` when the model is unknown
    fn model_default_config(&self, model_id: &str, provider_id: &str) -> Option<ModelCapabilities>;
}

/// Capability flags of a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapabilities {
    pub vision: bool,
    pub function_call: bool,
}

impl ModelCapabilities {
    pub fn new(vision: bool, function_call: bool) -> Self {
        Self {
            vision,
            function_call,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General application settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Provider configurations keyed by provider id
    #[serde(default = "default_providers")]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    let mut providers = HashMap::new();
    providers.insert("anthropic".to_string(), ProviderConfig::anthropic());
    providers.insert("openai".to_string(), ProviderConfig::openai());
    providers.insert("deepseek".to_string(), ProviderConfig::deepseek());
    providers
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            providers: default_providers(),
        }
    }
}

impl Config {
    /// Get a specific provider config by id
    pub fn get_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Capabilities of a model under a provider
    ///
    /// An empty `provider_id` searches every provider.
    pub fn model_capabilities(&self, model_id: &str, provider_id: &str) -> Option<ModelCapabilities> {
        if let Some(caps) = self
            .providers
            .get(provider_id)
            .and_then(|p| p.models.get(model_id))
        {
            return Some(*caps);
        }
        if !provider_id.is_empty() {
            return None;
        }
        self.providers
            .values()
            .find_map(|p| p.models.get(model_id).copied())
    }
}

impl SettingsProvider for Config {
    fn get_setting(&self, key: &str) -> Option<String> {
        match key {
            INPUT_CHAT_MODE => self.general.chat_mode.clone(),
            "log_level" => Some(self.general.log_level.clone()),
            "workspace_root" => self
                .general
                .workspace_root
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    fn model_default_config(&self, model_id: &str, provider_id: &str) -> Option<ModelCapabilities> {
        self.model_capabilities(model_id, provider_id)
    }
}

/// Live-editable configuration: edits become visible on the next lookup
impl SettingsProvider for RwLock<Config> {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.read().get_setting(key)
    }

    fn model_default_config(&self, model_id: &str, provider_id: &str) -> Option<ModelCapabilities> {
        self.read().model_default_config(model_id, provider_id)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Known models and their capabilities
    pub models: HashMap<String, ModelCapabilities>,
}

impl ProviderConfig {
    /// Create Anthropic provider config
    pub fn anthropic() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4-20250514".to_string(),
            ModelCapabilities::new(true, true),
        );
        models.insert(
            "claude-3-5-haiku-20241022".to_string(),
            ModelCapabilities::new(false, true),
        );
        Self { models }
    }

    /// Create OpenAI provider config
    pub fn openai() -> Self {
        let mut models = HashMap::new();
        models.insert("gpt-4o".to_string(), ModelCapabilities::new(true, true));
        models.insert("gpt-4o-mini".to_string(), ModelCapabilities::new(true, true));
        Self { models }
    }

    /// Create DeepSeek provider config
    pub fn deepseek() -> Self {
        let mut models = HashMap::new();
        models.insert("deepseek-chat".to_string(), ModelCapabilities::new(false, true));
        models.insert(
            "deepseek-reasoner".to_string(),
            ModelCapabilities::new(false, false),
        );
        Self { models }
    }
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Fallback chat mode for conversations that persist none
    pub chat_mode: Option<String>,
    /// Root directory for default agent workspaces (OS temp dir when unset)
    pub workspace_root: Option<PathBuf>,
    /// Default log filter of the CLI (`RUST_LOG` and `--verbose` win)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            chat_mode: None,
            workspace_root: None,
            log_level: "warn".to_string(),
        }
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("waypoint").join("config.toml"))
    }

    /// Load configuration from a file
    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Path the config is loaded from and saved to
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the manager, keeping the configuration
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Set the fallback chat mode
    pub fn set_chat_mode(&mut self, mode: impl Into<String>) {
        self.config.general.chat_mode = Some(mode.into());
    }

    /// Register (or replace) a model's capabilities under a provider
    pub fn set_model_capabilities(
        &mut self,
        provider_id: &str,
        model_id: &str,
        capabilities: ModelCapabilities,
    ) {
        self.config
            .providers
            .entry(provider_id.to_string())
            .or_default()
            .models
            .insert(model_id.to_string(), capabilities);
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config_path: PathBuf::from("config.toml"),
            config: Config::default(),
        })
    }
}
