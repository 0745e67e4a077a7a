// Core routing - event model, media context and dispatch
pub mod dispatch;
pub mod event;
pub mod media_context;

// Command contract, registry and built-in commands
pub mod commands;

// Graph API collaborators
pub mod attachments;
pub mod graph;
pub mod menu;
pub mod messenger;

// Application layer
pub mod config;
pub mod server;

pub use commands::{Command, CommandArgs, CommandContext, CommandRegistry, Role};
pub use config::Config;
pub use dispatch::{DispatchOutcome, DispatchSettings, Dispatcher, MediaPolicy};
pub use event::{InboundEvent, MediaKind, MediaRef};
pub use media_context::MediaContextStore;
