//! Utility commands: help, ping

use super::{Command, CommandContext, Role};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Creates utility commands
pub fn create_commands() -> Vec<Arc<dyn Command>> {
    vec![Arc::new(HelpCommand), Arc::new(PingCommand)]
}

/// Lists the commands the sender is allowed to use
pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Show available commands and usage information"
    }

    async fn execute(&self, ctx: CommandContext<'_>) -> Result<()> {
        let wanted = ctx.args.tokens.first().map(|t| t.to_lowercase());

        if let Some(name) = wanted {
            let text = match ctx.registry.get(&name) {
                Some(cmd) if cmd.role() == Role::Open || ctx.is_admin => {
                    format!("📖 {}\n{}", cmd.name(), cmd.description())
                }
                _ => format!("❓ No command named \"{name}\"."),
            };
            return ctx.reply(&text).await;
        }

        let mut lines = vec!["📋 Available commands:".to_string()];
        for cmd in ctx.registry.iter() {
            match cmd.role() {
                Role::Open => lines.push(format!("• {} - {}", cmd.name(), cmd.description())),
                Role::Restricted if ctx.is_admin => {
                    lines.push(format!("• {} (Admin) - {}", cmd.name(), cmd.description()))
                }
                Role::Restricted => {}
            }
        }

        ctx.reply(&lines.join("\n")).await
    }
}

/// Tests bot responsiveness
pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Test bot responsiveness"
    }

    async fn execute(&self, ctx: CommandContext<'_>) -> Result<()> {
        ctx.reply("🏓 pong").await
    }
}
