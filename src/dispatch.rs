//! # Feature: Message Dispatch
//!
//! Turns one inbound message into exactly one [`DispatchOutcome`]: which command runs,
//! with which arguments and which media, or why nothing ran. Media commands operate on
//! the sender's most recent image/video instead of typed arguments; everything else is
//! looked up in the registry, and unknown words go to the catch-all fallback.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Authorization applies to media commands and the fallback
//! - 1.1.0: Structured outcomes, reply attachments, configurable media table
//! - 1.0.0: Initial prefix/command/fallback routing

use crate::attachments::AttachmentResolver;
use crate::commands::{Command, CommandArgs, CommandContext, CommandRegistry, Role};
use crate::config::Config;
use crate::event::{InboundEvent, MediaRef};
use crate::media_context::{MediaContextStore, MediaKinds, StoredMedia};
use crate::messenger::Messenger;
use anyhow::Result;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

pub const UNAUTHORIZED_REPLY: &str = "🚫 You are not authorized to use this command.";
pub const UNKNOWN_COMMAND_REPLY: &str = "❓ Unknown command and AI fallback unavailable.";

/// How a media command picks its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPolicy {
    /// Needs an image
    Image,
    /// Needs an image or, failing that, a video
    Media,
    /// Same as `Media`, but the user is asked for an image when nothing is available
    MediaImagePrompt,
    /// Gets the typed arguments, the raw event and the image if there is one
    Vision,
}

/// The media a command could not run without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRequirement {
    Image,
    ImageOrVideo,
}

/// Media command table used when the configuration does not provide one
pub fn default_media_commands() -> BTreeMap<String, MediaPolicy> {
    let table = [
        ("remini", MediaPolicy::Image),
        ("restore", MediaPolicy::Image),
        ("removebg", MediaPolicy::Image),
        ("zombie", MediaPolicy::Image),
        ("blur", MediaPolicy::Image),
        ("vampire", MediaPolicy::Image),
        ("imgbb", MediaPolicy::Media),
        ("imgur", MediaPolicy::Media),
        ("ocr", MediaPolicy::MediaImagePrompt),
        ("catmoe", MediaPolicy::MediaImagePrompt),
        ("gemini", MediaPolicy::Vision),
    ];
    table
        .into_iter()
        .map(|(name, policy)| (name.to_string(), policy))
        .collect()
}

/// Why an event was not dispatched at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingSender,
    MissingText,
}

/// Result of resolving one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A registered command ran to completion
    Invoked {
        command: String,
        args: CommandArgs,
        media: Option<MediaRef>,
    },
    /// The command is restricted and the sender is not an admin
    AuthorizationDenied { command: String },
    /// A media command had nothing to work on
    MediaMissing {
        command: String,
        requirement: MediaRequirement,
    },
    /// Unknown command; the fallback ran with the whole message
    Fallback { command: String, text: String },
    /// Unknown command and no fallback registered
    UnknownCommand { command: String },
    /// The command returned an error; `message` is what the user was told
    Failed { command: String, message: String },
    /// Malformed event, nothing was replied
    Dropped { reason: DropReason },
}

/// Dispatcher settings derived from the configuration
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub access_token: String,
    pub prefix: String,
    pub admin_ids: HashSet<String>,
    pub fallback_command: String,
    pub media_commands: HashMap<String, MediaPolicy>,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        let media_commands = config
            .media_commands
            .clone()
            .unwrap_or_else(default_media_commands)
            .into_iter()
            .map(|(name, policy)| (name.to_lowercase(), policy))
            .collect();

        DispatchSettings {
            access_token: config.page_access_token.clone(),
            prefix: config.prefix.clone(),
            admin_ids: config.admin_ids.iter().cloned().collect(),
            fallback_command: config.fallback_command.to_lowercase(),
            media_commands,
        }
    }

    pub fn is_admin(&self, sender_id: &str) -> bool {
        self.admin_ids.contains(sender_id)
    }

    pub fn media_policy(&self, command: &str) -> Option<MediaPolicy> {
        self.media_commands.get(command).copied()
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            access_token: String::new(),
            prefix: String::new(),
            admin_ids: HashSet::new(),
            fallback_command: "ai".to_string(),
            media_commands: default_media_commands().into_iter().collect(),
        }
    }
}

/// Command name and arguments split out of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Lowercased first word, prefix removed
    pub name: String,
    pub args: CommandArgs,
}

impl ParsedMessage {
    pub fn parse(text: &str, prefix: &str) -> Self {
        let text = text.trim();
        let body = text.strip_prefix(prefix).unwrap_or(text).trim_start();

        let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));

        ParsedMessage {
            name: name.to_lowercase(),
            args: CommandArgs::parse(rest),
        }
    }
}

/// Resolves inbound events to command invocations
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    media: MediaContextStore,
    attachments: Arc<dyn AttachmentResolver>,
    messenger: Arc<dyn Messenger>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        media: MediaContextStore,
        attachments: Arc<dyn AttachmentResolver>,
        messenger: Arc<dyn Messenger>,
        settings: DispatchSettings,
    ) -> Self {
        Dispatcher {
            registry,
            media,
            attachments,
            messenger,
            settings,
        }
    }

    /// Resolve one event, run whatever it asks for and report the outcome.
    ///
    /// Never fails: command errors are logged and reported to the sender.
    pub async fn dispatch(&self, event: &InboundEvent) -> DispatchOutcome {
        let Some(sender_id) = event.sender_id.as_deref() else {
            error!("Invalid event object: missing sender ID");
            return DispatchOutcome::Dropped {
                reason: DropReason::MissingSender,
            };
        };

        let own = self.media.record_if_present(sender_id, &event.attachments);
        let stored = self.media.peek(sender_id);
        let resolved = StoredMedia {
            image: own.image.or(stored.image),
            video: own.video.or(stored.video),
        };

        let Some(text) = event.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            debug!("Message from {sender_id} has no text, not dispatching");
            return DispatchOutcome::Dropped {
                reason: DropReason::MissingText,
            };
        };

        info!(
            "Received message {} from {sender_id}: {text}",
            event.message_id.as_deref().unwrap_or("-")
        );
        let parsed = ParsedMessage::parse(text, &self.settings.prefix);
        debug!(
            "Parsed command: {} with arguments: {:?}",
            parsed.name, parsed.args.tokens
        );

        let result = match self.registry.get(&parsed.name).cloned() {
            Some(command) => {
                self.run_registered(sender_id, event, &parsed, command.as_ref(), &resolved)
                    .await
            }
            None => self.run_fallback(sender_id, event, &parsed, text).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => self.report_failure(sender_id, &parsed.name, e).await,
        }
    }

    async fn run_registered(
        &self,
        sender_id: &str,
        event: &InboundEvent,
        parsed: &ParsedMessage,
        command: &dyn Command,
        resolved: &StoredMedia,
    ) -> Result<DispatchOutcome> {
        if !self.authorize(command, sender_id) {
            self.deny(sender_id, &parsed.name).await;
            return Ok(DispatchOutcome::AuthorizationDenied {
                command: parsed.name.clone(),
            });
        }

        match self.settings.media_policy(&parsed.name) {
            Some(policy) => {
                self.run_media_command(sender_id, event, parsed, command, policy, resolved)
                    .await
            }
            None => {
                self.run_generic_command(sender_id, event, parsed, command, resolved)
                    .await
            }
        }
    }

    async fn run_media_command(
        &self,
        sender_id: &str,
        event: &InboundEvent,
        parsed: &ParsedMessage,
        command: &dyn Command,
        policy: MediaPolicy,
        resolved: &StoredMedia,
    ) -> Result<DispatchOutcome> {
        let name = parsed.name.clone();

        match policy {
            MediaPolicy::Image => {
                let Some(image) = resolved.image.clone() else {
                    return Ok(self
                        .media_missing(sender_id, name, MediaRequirement::Image, "an image")
                        .await);
                };

                let args = CommandArgs::empty();
                self.invoke(command, sender_id, &args, None, Some(&image))
                    .await?;
                self.media
                    .consume_matching(sender_id, MediaKinds::Image, resolved);

                Ok(DispatchOutcome::Invoked {
                    command: name,
                    args,
                    media: Some(image),
                })
            }
            MediaPolicy::Media | MediaPolicy::MediaImagePrompt => {
                let Some(media) = resolved.preferred().cloned() else {
                    let wanted = if policy == MediaPolicy::Media {
                        "an image or video"
                    } else {
                        "an image"
                    };
                    return Ok(self
                        .media_missing(sender_id, name, MediaRequirement::ImageOrVideo, wanted)
                        .await);
                };

                let args = CommandArgs::empty();
                self.invoke(command, sender_id, &args, None, Some(&media))
                    .await?;
                self.media
                    .consume_matching(sender_id, MediaKinds::Both, resolved);

                Ok(DispatchOutcome::Invoked {
                    command: name,
                    args,
                    media: Some(media),
                })
            }
            MediaPolicy::Vision => {
                let image = resolved.image.clone();
                self.invoke(command, sender_id, &parsed.args, Some(event), image.as_ref())
                    .await?;
                self.media
                    .consume_matching(sender_id, MediaKinds::Image, resolved);

                Ok(DispatchOutcome::Invoked {
                    command: name,
                    args: parsed.args.clone(),
                    media: image,
                })
            }
        }
    }

    async fn run_generic_command(
        &self,
        sender_id: &str,
        event: &InboundEvent,
        parsed: &ParsedMessage,
        command: &dyn Command,
        resolved: &StoredMedia,
    ) -> Result<DispatchOutcome> {
        let replied = match event.reply_to.as_deref() {
            Some(mid) => self.reply_attachment(mid).await,
            None => None,
        };

        let media = replied
            .or_else(|| resolved.image.clone())
            .or_else(|| resolved.video.clone());

        self.invoke(command, sender_id, &parsed.args, Some(event), media.as_ref())
            .await?;

        Ok(DispatchOutcome::Invoked {
            command: parsed.name.clone(),
            args: parsed.args.clone(),
            media,
        })
    }

    async fn run_fallback(
        &self,
        sender_id: &str,
        event: &InboundEvent,
        parsed: &ParsedMessage,
        text: &str,
    ) -> Result<DispatchOutcome> {
        let Some(fallback) = self.registry.get(&self.settings.fallback_command).cloned() else {
            info!("Unknown command '{}' and no fallback registered", parsed.name);
            self.send(sender_id, UNKNOWN_COMMAND_REPLY).await;
            return Ok(DispatchOutcome::UnknownCommand {
                command: parsed.name.clone(),
            });
        };

        if !self.authorize(fallback.as_ref(), sender_id) {
            self.deny(sender_id, fallback.name()).await;
            return Ok(DispatchOutcome::AuthorizationDenied {
                command: self.settings.fallback_command.clone(),
            });
        }

        let args = CommandArgs::whole(text);
        self.invoke(fallback.as_ref(), sender_id, &args, Some(event), None)
            .await?;

        Ok(DispatchOutcome::Fallback {
            command: self.settings.fallback_command.clone(),
            text: text.to_string(),
        })
    }

    async fn invoke(
        &self,
        command: &dyn Command,
        sender_id: &str,
        args: &CommandArgs,
        event: Option<&InboundEvent>,
        media: Option<&MediaRef>,
    ) -> Result<()> {
        debug!(
            "Executing {} for {sender_id} (media: {:?})",
            command.name(),
            media.map(|m| m.url.as_str())
        );

        let ctx = CommandContext {
            sender_id,
            args,
            access_token: &self.settings.access_token,
            event,
            media,
            messenger: self.messenger.as_ref(),
            registry: &self.registry,
            is_admin: self.settings.is_admin(sender_id),
        };
        command.execute(ctx).await
    }

    fn authorize(&self, command: &dyn Command, sender_id: &str) -> bool {
        command.role() != Role::Restricted || self.settings.is_admin(sender_id)
    }

    async fn deny(&self, sender_id: &str, command: &str) {
        warn!("Denied restricted command '{command}' for {sender_id}");
        self.send(sender_id, UNAUTHORIZED_REPLY).await;
    }

    async fn media_missing(
        &self,
        sender_id: &str,
        command: String,
        requirement: MediaRequirement,
        wanted: &str,
    ) -> DispatchOutcome {
        let text = format!("❌ Please send {wanted} first, then type \"{command}\".");
        self.send(sender_id, &text).await;
        DispatchOutcome::MediaMissing {
            command,
            requirement,
        }
    }

    /// Image attached to the replied-to message, if it can be found
    async fn reply_attachment(&self, message_id: &str) -> Option<MediaRef> {
        match self
            .attachments
            .resolve_reply_attachment(message_id, &self.settings.access_token)
            .await
        {
            Ok(url) => Some(MediaRef::image(url)),
            Err(e) => {
                warn!("Failed to get attachment for reply {message_id}: {e:#}");
                None
            }
        }
    }

    async fn report_failure(
        &self,
        sender_id: &str,
        command: &str,
        err: anyhow::Error,
    ) -> DispatchOutcome {
        error!("Error executing command \"{command}\": {err:?}");

        let message = err.to_string();
        let message = if message.trim().is_empty() {
            format!("❌ Error executing \"{command}\".")
        } else {
            message
        };

        self.send(sender_id, &message).await;
        DispatchOutcome::Failed {
            command: command.to_string(),
            message,
        }
    }

    async fn send(&self, recipient_id: &str, text: &str) {
        if let Err(e) = self
            .messenger
            .send_text(recipient_id, text, &self.settings.access_token)
            .await
        {
            error!("Failed to send message to {recipient_id}: {e:#}");
        }
    }
}
