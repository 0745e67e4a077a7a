//! Messenger page bot entry point
//!
//! Configuration can come from:
//! - config.yaml (or the file named by CONFIG_FILE)
//! - Environment variables / token.txt

use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use pagebot::attachments::GraphAttachmentResolver;
use pagebot::commands::{admin, utility, Command, CommandRegistry};
use pagebot::config::Config;
use pagebot::dispatch::{DispatchSettings, Dispatcher};
use pagebot::graph::GraphClient;
use pagebot::media_context::MediaContextStore;
use pagebot::menu::{menu_entries, MenuSync};
use pagebot::messenger::GraphMessenger;
use pagebot::server::{self, AppState};

/// How often expired media context is swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::auto_load()?;

    // Set up logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!("Starting page bot...");
    info!("Admins configured: {}", config.admin_ids.len());

    let graph = GraphClient::new(config.graph_api_base.clone());

    let media = MediaContextStore::with_ttl_minutes(config.media_context_ttl_minutes)?;
    if media.spawn_sweeper(SWEEP_INTERVAL).is_none() {
        info!("Media context expiry disabled");
    }

    let commands: Vec<Arc<dyn Command>> = utility::create_commands()
        .into_iter()
        .chain(admin::create_commands(media.clone()))
        .collect();
    let registry = Arc::new(CommandRegistry::builder().register_all(commands)?.build());
    info!("Registered {} command(s)", registry.len());

    if !registry.contains(&config.fallback_command) {
        warn!(
            "Fallback command '{}' is not registered; unknown commands will get a canned reply",
            config.fallback_command
        );
    }

    if config.sync_menu_on_startup {
        let sync = MenuSync::new(graph.clone(), config.page_access_token.clone());
        if let Err(e) = sync.sync(&menu_entries(&registry), false).await {
            error!("Error loading initial menu commands: {e:#}");
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        media,
        Arc::new(GraphAttachmentResolver::new(graph.clone())),
        Arc::new(GraphMessenger::new(graph)),
        DispatchSettings::from_config(&config),
    ));

    let state = AppState {
        dispatcher,
        verify_token: config.verify_token.clone(),
    };

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    server::serve(state, config.port, shutdown).await?;

    info!("Page bot shut down successfully");
    Ok(())
}
