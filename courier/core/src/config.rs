//! TOML Configuration File Support
//!
//! Configuration for the chat core, read from
//! `$XDG_CONFIG_HOME/courier/chat.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! url = "https://project.example.co"
//! api_key = "public-anon-key"
//! access_token = "user-jwt"
//! request_timeout_secs = 120
//!
//! [chat]
//! function_path = "functions/v1/chat"
//! default_title = "Nova Conversa"
//! title_max_chars = 50
//! max_buffer_bytes = 1048576
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_BACKEND_URL`
//! - `COURIER_API_KEY`
//! - `COURIER_ACCESS_TOKEN`
//! - `COURIER_REQUEST_TIMEOUT` (seconds)
//! - `COURIER_DEFAULT_TITLE`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{DEFAULT_TITLE, TITLE_MAX_CHARS};
use crate::streaming::DEFAULT_MAX_BUFFER_BYTES;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Project base URL
    pub url: Option<String>,

    /// Public API key
    pub api_key: Option<String>,

    /// Signed-in user's access token
    pub access_token: Option<String>,

    /// Timeout for REST requests in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Path of the streaming function under the base URL
    pub function_path: Option<String>,

    /// Title of a conversation before its first message
    pub default_title: Option<String>,

    /// Characters kept from the first message for the title
    pub title_max_chars: Option<usize>,

    /// Maximum undecoded bytes buffered from the stream
    pub max_buffer_bytes: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Chat configuration section
    pub chat: ChatToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Connection settings for the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSettings {
    /// Project base URL
    pub url: String,
    /// Public API key
    pub api_key: String,
    /// Signed-in user's access token
    pub access_token: Option<String>,
    /// Timeout for REST requests
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Chat behaviour settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSettings {
    /// Path of the streaming function under the base URL
    pub function_path: String,
    /// Title of a conversation before its first message
    pub default_title: String,
    /// Characters kept from the first message for the title
    pub title_max_chars: usize,
    /// Maximum undecoded bytes buffered from the stream
    pub max_buffer_bytes: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            function_path: "functions/v1/chat".to_string(),
            default_title: DEFAULT_TITLE.to_string(),
            title_max_chars: TITLE_MAX_CHARS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

/// Centralized configuration
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct CourierConfig {
    /// Backend connection
    pub backend: BackendSettings,

    /// Chat behaviour
    pub chat: ChatSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: Option<ConfigSource>,
}

impl CourierConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = Some(source);
    }

    /// Full URL of the streaming chat function
    #[must_use]
    pub fn chat_endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.backend.url.trim_end_matches('/'),
            self.chat.function_path.trim_start_matches('/')
        )
    }

    /// Check values that would only fail later at runtime
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.backend.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "backend url must start with http:// or https://, got {url:?}"
            )));
        }
        if self.chat.title_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "title_max_chars must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_buffer_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_buffer_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/courier/chat.toml` or
/// `~/.config/courier/chat.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("courier").join("chat.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<CourierConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<&Path>) -> Result<CourierConfig, ConfigError> {
    let mut config = load_file_config(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Defaults overlaid with the TOML file, if it exists
fn load_file_config(path: Option<&Path>) -> Result<CourierConfig, ConfigError> {
    let mut config = CourierConfig::default();

    let Some(config_path) = path else {
        return Ok(config);
    };

    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(config);
    }

    let toml_content =
        std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
            path: config_path.to_path_buf(),
            source: e,
        })?;

    let toml_config: CourierToml = toml::from_str(&toml_content)?;
    apply_toml_config(&mut config, &toml_config);
    config.config_file_path = Some(config_path.to_path_buf());
    config.source = Some(ConfigSource::File);

    tracing::info!(
        path = %config_path.display(),
        "Loaded configuration from file"
    );
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut CourierConfig, toml: &CourierToml) {
    if let Some(ref url) = toml.backend.url {
        config.backend.url = url.clone();
    }
    if let Some(ref key) = toml.backend.api_key {
        config.backend.api_key = key.clone();
    }
    if toml.backend.access_token.is_some() {
        config.backend.access_token = toml.backend.access_token.clone();
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }

    if let Some(ref path) = toml.chat.function_path {
        config.chat.function_path = path.clone();
    }
    if let Some(ref title) = toml.chat.default_title {
        config.chat.default_title = title.clone();
    }
    if let Some(max) = toml.chat.title_max_chars {
        config.chat.title_max_chars = max;
    }
    if let Some(max) = toml.chat.max_buffer_bytes {
        config.chat.max_buffer_bytes = max;
    }
}

/// Apply environment variable overrides to the config
///
/// `lookup` resolves a variable name; the loader passes `std::env::var`.
fn apply_env_config<F>(config: &mut CourierConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("COURIER_BACKEND_URL") {
        config.backend.url = url;
        config.source = Some(ConfigSource::Env);
    }
    if let Some(key) = lookup("COURIER_API_KEY") {
        config.backend.api_key = key;
        config.source = Some(ConfigSource::Env);
    }
    if let Some(token) = lookup("COURIER_ACCESS_TOKEN") {
        config.backend.access_token = Some(token).filter(|t| !t.is_empty());
        config.source = Some(ConfigSource::Env);
    }
    if let Some(timeout) = lookup("COURIER_REQUEST_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.backend.request_timeout = Duration::from_secs(secs);
            config.source = Some(ConfigSource::Env);
        } else {
            tracing::warn!(value = %timeout, "Ignoring non-numeric COURIER_REQUEST_TIMEOUT");
        }
    }
    if let Some(title) = lookup("COURIER_DEFAULT_TITLE") {
        config.chat.default_title = title;
        config.source = Some(ConfigSource::Env);
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend URL override
    pub backend_url: Option<String>,

    /// API key override
    pub api_key: Option<String>,

    /// Access token override
    pub access_token: Option<String>,

    /// Request timeout override (seconds)
    pub request_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend URL override
    #[must_use]
    pub fn with_backend_url(mut self, url: String) -> Self {
        self.backend_url = Some(url);
        self
    }

    /// Set API key override
    #[must_use]
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Set access token override
    #[must_use]
    pub fn with_access_token(mut self, token: String) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut CourierConfig) {
        if self.backend_url.is_some()
            || self.api_key.is_some()
            || self.access_token.is_some()
            || self.request_timeout_secs.is_some()
        {
            config.source = Some(ConfigSource::Cli);
        }

        if let Some(ref url) = self.backend_url {
            config.backend.url = url.clone();
        }
        if let Some(ref key) = self.api_key {
            config.backend.api_key = key.clone();
        }
        if let Some(ref token) = self.access_token {
            config.backend.access_token = Some(token.clone());
        }
        if let Some(secs) = self.request_timeout_secs {
            config.backend.request_timeout = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
