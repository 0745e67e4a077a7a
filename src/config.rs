//! # Feature: Configuration System
//!
//! Loads the bot configuration from a YAML file (with environment variable
//! interpolation) or, when no file is present, from environment variables.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Configurable media command table and media context TTL
//! - 1.0.0: Initial YAML/env configuration

use crate::dispatch::MediaPolicy;
use crate::graph::DEFAULT_GRAPH_API_BASE;
use crate::media_context::ttl_from_minutes;
use anyhow::{Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

/// File the page access token is read from when it is not configured elsewhere
pub const TOKEN_FILE: &str = "token.txt";

/// Bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Page access token used for every Graph API call (required)
    #[serde(default)]
    pub page_access_token: String,

    /// Token the platform echoes back during webhook subscription
    #[serde(default = "default_verify_token")]
    pub verify_token: String,

    /// Senders allowed to run restricted commands
    #[serde(default)]
    pub admin_ids: Vec<String>,

    /// Command prefix, empty for raw commands
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Command that receives any message whose first word is not a registered command
    #[serde(default = "default_fallback_command")]
    pub fallback_command: String,

    /// Minutes a remembered image/video stays usable; 0 keeps it until consumed
    #[serde(default = "default_media_context_ttl")]
    pub media_context_ttl_minutes: u64,

    /// Publish the command list to the persistent menu on startup
    #[serde(default = "default_sync_menu")]
    pub sync_menu_on_startup: bool,

    /// Overrides for the media command table (name -> policy)
    #[serde(default)]
    pub media_commands: Option<BTreeMap<String, MediaPolicy>>,
}

// Default value functions for serde
fn default_verify_token() -> String {
    "pagebot".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_graph_api_base() -> String {
    DEFAULT_GRAPH_API_BASE.to_string()
}

fn default_fallback_command() -> String {
    "ai".to_string()
}

fn default_media_context_ttl() -> u64 {
    30
}

fn default_sync_menu() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_access_token: String::new(),
            verify_token: default_verify_token(),
            admin_ids: Vec::new(),
            prefix: String::new(),
            port: default_port(),
            log_level: default_log_level(),
            graph_api_base: default_graph_api_base(),
            fallback_command: default_fallback_command(),
            media_context_ttl_minutes: default_media_context_ttl(),
            sync_menu_on_startup: default_sync_menu(),
            media_commands: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let page_access_token = match env::var("PAGE_ACCESS_TOKEN") {
            Ok(token) => token,
            Err(_) => read_token_file(TOKEN_FILE).with_context(|| {
                format!("PAGE_ACCESS_TOKEN environment variable not set and {TOKEN_FILE} is unreadable")
            })?,
        };

        let config = Config {
            page_access_token: page_access_token.trim().to_string(),
            verify_token: env::var("VERIFY_TOKEN").unwrap_or(defaults.verify_token),
            admin_ids: env::var("ADMIN_IDS")
                .map(|ids| parse_id_list(&ids))
                .unwrap_or_default(),
            prefix: env::var("PREFIX").unwrap_or_default(),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            graph_api_base: env::var("GRAPH_API_BASE").unwrap_or(defaults.graph_api_base),
            fallback_command: env::var("FALLBACK_COMMAND").unwrap_or(defaults.fallback_command),
            media_context_ttl_minutes: env::var("MEDIA_CONTEXT_TTL_MINUTES")
                .ok()
                .and_then(|m| m.parse().ok())
                .unwrap_or(defaults.media_context_ttl_minutes),
            sync_menu_on_startup: env::var("SYNC_MENU_ON_STARTUP")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.sync_menu_on_startup),
            media_commands: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` and `${VAR_NAME:-default}` syntax.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let interpolated = interpolate_env_vars(&content)?;

        let mut config: Config = serde_yaml::from_str(&interpolated)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.page_access_token.is_empty() {
            if let Ok(token) = read_token_file(TOKEN_FILE) {
                config.page_access_token = token;
            }
        }

        config.validate()?;

        info!(
            "Loaded config from {} ({} admin(s))",
            path.display(),
            config.admin_ids.len()
        );

        Ok(config)
    }

    /// Auto-detect and load configuration
    ///
    /// Priority order:
    /// 1. If CONFIG_FILE env var is set, load from that file
    /// 2. If config.yaml exists in current directory, load from it
    /// 3. Fall back to environment variables
    ///
    /// `PORT` from the environment always wins over the configured port.
    pub fn auto_load() -> Result<Self> {
        let mut config = if let Ok(config_path) = env::var("CONFIG_FILE") {
            info!("Loading config from CONFIG_FILE: {}", config_path);
            Self::from_file(&config_path)?
        } else if Path::new("config.yaml").exists() {
            info!("Loading config from config.yaml");
            Self::from_file("config.yaml")?
        } else {
            info!("No config file found, using environment variables");
            Self::from_env()?
        };

        if let Ok(port) = env::var("PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Ignoring invalid PORT value '{}'", port),
            }
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.page_access_token.trim().is_empty() {
            anyhow::bail!("page_access_token is required");
        }

        if self.verify_token.is_empty() {
            anyhow::bail!("verify_token must not be empty");
        }

        if self.fallback_command.contains(char::is_whitespace) {
            anyhow::bail!(
                "fallback_command '{}' must be a single word",
                self.fallback_command
            );
        }

        if self.prefix.contains(char::is_whitespace) {
            anyhow::bail!("prefix must not contain whitespace");
        }

        ttl_from_minutes(self.media_context_ttl_minutes)
            .context("Invalid media_context_ttl_minutes")?;

        if let Some(ref table) = self.media_commands {
            if let Some(name) = table.keys().find(|n| n.is_empty() || n.contains(char::is_whitespace)) {
                anyhow::bail!("Invalid media command name '{}'", name);
            }
        }

        Ok(())
    }
}

fn read_token_file(path: &str) -> Result<String> {
    let token = fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {path}"))?;
    Ok(token.trim().to_string())
}

/// Split a comma separated list of ids, skipping blanks
fn parse_id_list(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Environment Variable Interpolation
// ============================================================================

// Pattern: ${VAR_NAME} or ${VAR_NAME:-default}
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex")
});

/// Interpolate environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. If a variable is not set, returns an error.
/// Use `${VAR_NAME:-default}` for default values.
fn interpolate_env_vars(content: &str) -> Result<String> {
    let mut errors = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(v) => v,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    errors.push(format!("Environment variable '{}' is not set", var_name));
                    String::new()
                }
            },
        }
    });

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variables:\n  - {}", errors.join("\n  - "));
    }

    Ok(result.into_owned())
}

// ============================================================================
// Tests
// ============================================================================
