//! Outbound replies to users.

use crate::graph::GraphClient;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde_json::json;

/// Delivers plain-text replies back to a user
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, recipient_id: &str, text: &str, access_token: &str) -> Result<()>;
}

/// Messenger backed by the Send API (`POST /me/messages`)
#[derive(Clone)]
pub struct GraphMessenger {
    client: GraphClient,
}

impl GraphMessenger {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Messenger for GraphMessenger {
    async fn send_text(&self, recipient_id: &str, text: &str, access_token: &str) -> Result<()> {
        let body = json!({
            "recipient": { "id": recipient_id },
            "messaging_type": "RESPONSE",
            "message": { "text": text },
        });

        self.client
            .send_json(Method::POST, "/me/messages", access_token, &body)
            .await?;
        debug!("Sent {} chars to {recipient_id}", text.chars().count());
        Ok(())
    }
}
