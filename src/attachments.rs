//! Looks up the image attached to a message the user replied to.

use crate::graph::GraphClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;

#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    /// Return the image URL attached to `message_id`
    async fn resolve_reply_attachment(&self, message_id: &str, access_token: &str) -> Result<String>;
}

/// Resolver backed by `GET /{message-id}/attachments`
#[derive(Clone)]
pub struct GraphAttachmentResolver {
    client: GraphClient,
}

impl GraphAttachmentResolver {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttachmentResolver for GraphAttachmentResolver {
    async fn resolve_reply_attachment(&self, message_id: &str, access_token: &str) -> Result<String> {
        if message_id.is_empty() {
            anyhow::bail!("No message ID provided.");
        }

        let data = self
            .client
            .get(&format!("/{message_id}/attachments"), access_token)
            .await
            .map_err(|e| {
                warn!("Error fetching attachments for {message_id}: {e:#}");
                e
            })
            .context("Failed to fetch attachments.")?;

        data["data"][0]["image_data"]["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("No image found in the replied message."))
    }
}
