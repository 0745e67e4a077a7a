//! # Feature: Persistent Menu Sync
//!
//! Publishes the registered commands to the page's persistent command menu so users can
//! discover them from the composer.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true (`sync_menu_on_startup`)
//!
//! ## Changelog
//! - 1.0.0: Initial release with delete-then-post reload

use crate::commands::{CommandRegistry, Role};
use crate::graph::GraphClient;
use anyhow::{Context, Result};
use log::info;
use reqwest::Method;
use serde::Serialize;
use serde_json::json;

const PROFILE_PATH: &str = "/me/messenger_profile";

/// One entry of the persistent menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub name: String,
    pub description: String,
}

/// Menu entries for every registered command. Restricted commands are labelled.
pub fn menu_entries(registry: &CommandRegistry) -> Vec<MenuEntry> {
    registry
        .iter()
        .filter(|cmd| !cmd.description().is_empty())
        .map(|cmd| {
            let name = match cmd.role() {
                Role::Restricted => format!("{} (Admin)", cmd.name()),
                Role::Open => cmd.name().to_string(),
            };
            MenuEntry {
                name,
                description: cmd.description().to_string(),
            }
        })
        .collect()
}

/// Pushes menu entries to the Messenger Profile API
pub struct MenuSync {
    client: GraphClient,
    access_token: String,
}

impl MenuSync {
    pub fn new(client: GraphClient, access_token: impl Into<String>) -> Self {
        MenuSync {
            client,
            access_token: access_token.into(),
        }
    }

    /// Publish `entries`. When `reload` is set the existing menu is deleted first.
    pub async fn sync(&self, entries: &[MenuEntry], reload: bool) -> Result<()> {
        if reload {
            self.client
                .send_json(
                    Method::DELETE,
                    PROFILE_PATH,
                    &self.access_token,
                    &json!({ "fields": ["commands"] }),
                )
                .await
                .context("Failed to delete menu commands")?;
            info!("Menu commands deleted successfully");
        }

        let body = json!({
            "commands": [{ "locale": "default", "commands": entries }],
        });
        self.client
            .send_json(Method::POST, PROFILE_PATH, &self.access_token, &body)
            .await
            .context("Failed to load menu commands")?;

        info!("Menu commands loaded successfully ({} entries)", entries.len());
        Ok(())
    }
}
