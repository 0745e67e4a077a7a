//! Thin client for the Graph API endpoints the bot talks to.

use anyhow::{Context, Result};
use reqwest::{Method, Response};
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Shared HTTP client bound to a Graph API base URL
#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        GraphClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// GET `{base}{path}` with the access token as a query parameter
    pub async fn get(&self, path: &str, access_token: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .query(&[("access_token", access_token)])
            .send()
            .await
            .with_context(|| format!("Failed to connect to Graph API ({path})"))?;

        Self::json_or_error(path, response).await
    }

    /// Send a JSON body to `{base}{path}` with the access token as a query parameter
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
        body: &B,
    ) -> Result<Value> {
        let response = self
            .http
            .request(method, self.url(path))
            .query(&[("access_token", access_token)])
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to connect to Graph API ({path})"))?;

        Self::json_or_error(path, response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn json_or_error(path: &str, response: Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Graph API error on {path} ({status}): {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Graph API response ({path})"))
    }
}

impl Default for GraphClient {
    fn default() -> Self {
        Self::new(DEFAULT_GRAPH_API_BASE)
    }
}
