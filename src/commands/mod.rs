//! Command contract and registry.
//!
//! Every capability the bot exposes implements [`Command`]. Commands are registered once
//! at startup through [`CommandRegistry::builder`] and are read-only afterwards.

pub mod admin;
pub mod utility;

use crate::event::{InboundEvent, MediaRef};
use crate::messenger::Messenger;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Authorization tier attached to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Tier 0: only senders on the admin allow-list may invoke it
    Restricted,
    #[default]
    Open,
}

/// Arguments handed to a command.
///
/// `raw` is the untokenized text after the command name; `tokens` is the same text split
/// on whitespace. The catch-all fallback receives the whole message in both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pub raw: String,
    pub tokens: Vec<String>,
}

impl CommandArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tokenize `raw` on whitespace
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        CommandArgs {
            raw: raw.to_string(),
            tokens: raw.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Keep `text` as a single, untokenized argument
    pub fn whole(text: &str) -> Self {
        CommandArgs {
            raw: text.to_string(),
            tokens: vec![text.to_string()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Everything a command gets when it runs
pub struct CommandContext<'a> {
    pub sender_id: &'a str,
    pub args: &'a CommandArgs,
    pub access_token: &'a str,
    pub event: Option<&'a InboundEvent>,
    pub media: Option<&'a MediaRef>,
    pub messenger: &'a dyn Messenger,
    pub registry: &'a CommandRegistry,
    /// Whether the sender is on the admin allow-list
    pub is_admin: bool,
}

impl CommandContext<'_> {
    /// Reply to the sender
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.messenger
            .send_text(self.sender_id, text, self.access_token)
            .await
    }
}

/// A named capability. Commands send their own replies; the dispatcher never looks at
/// what they produce beyond success or failure.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn role(&self) -> Role {
        Role::Open
    }

    async fn execute(&self, ctx: CommandContext<'_>) -> Result<()>;
}

/// Read-only set of commands keyed by lowercased name
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
    order: Vec<String>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a command by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Commands in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Command>> {
        self.order.iter().filter_map(|name| self.commands.get(name))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Collects commands at startup, rejecting duplicate names
#[derive(Default)]
pub struct RegistryBuilder {
    registry: CommandRegistry,
}

impl RegistryBuilder {
    pub fn register(mut self, command: Arc<dyn Command>) -> Result<Self> {
        let key = command.name().trim().to_lowercase();
        if key.is_empty() {
            anyhow::bail!("Command with description '{}' has an empty name", command.description());
        }
        if key.contains(char::is_whitespace) {
            anyhow::bail!("Command name '{}' contains whitespace", command.name());
        }
        if self.registry.commands.contains_key(&key) {
            anyhow::bail!("Command '{}' is already registered", command.name());
        }

        info!("Loaded command: {}", command.name());
        self.registry.order.push(key.clone());
        self.registry.commands.insert(key, command);
        Ok(self)
    }

    pub fn register_all<I>(self, commands: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Command>>,
    {
        commands
            .into_iter()
            .try_fold(self, |builder, command| builder.register(command))
    }

    pub fn build(self) -> CommandRegistry {
        self.registry
    }
}
