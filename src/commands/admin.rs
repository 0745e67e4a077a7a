//! Admin commands: status

use super::{Command, CommandContext, Role};
use crate::media_context::MediaContextStore;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Creates admin commands
pub fn create_commands(media: MediaContextStore) -> Vec<Arc<dyn Command>> {
    vec![Arc::new(StatusCommand::new(media))]
}

/// Build version plus the short commit hash captured at compile time, if any
pub fn build_version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_COMMIT_HASH").filter(|h| !h.is_empty()) {
        Some(hash) => format!("{version} ({hash})"),
        None => version.to_string(),
    }
}

/// Reports version, uptime and pending media context (Admin)
pub struct StatusCommand {
    media: MediaContextStore,
    started_at: Instant,
}

impl StatusCommand {
    pub fn new(media: MediaContextStore) -> Self {
        StatusCommand {
            media,
            started_at: Instant::now(),
        }
    }
}

fn format_uptime(secs: u64) -> String {
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {}s", secs % 60)
    }
}

#[async_trait]
impl Command for StatusCommand {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Show bot version, uptime and pending media context"
    }

    fn role(&self) -> Role {
        Role::Restricted
    }

    async fn execute(&self, ctx: CommandContext<'_>) -> Result<()> {
        let text = format!(
            "🤖 Status\nVersion: {}\nUptime: {}\nCommands: {}\nUsers with pending media: {}",
            build_version(),
            format_uptime(self.started_at.elapsed().as_secs()),
            ctx.registry.len(),
            self.media.len(),
        );
        ctx.reply(&text).await
    }
}
