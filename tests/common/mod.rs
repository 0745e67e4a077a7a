//! Shared fakes for integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use pagebot::attachments::AttachmentResolver;
use pagebot::commands::{Command, CommandArgs, CommandContext, CommandRegistry, Role};
use pagebot::dispatch::{DispatchSettings, Dispatcher};
use pagebot::event::MediaRef;
use pagebot::media_context::MediaContextStore;
use pagebot::messenger::Messenger;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const ADMIN: &str = "admin-1";
pub const USER: &str = "user-1";

/// Messenger that records every reply
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, recipient_id: &str, text: &str, _access_token: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Resolver answering from a fixed table; unknown ids fail
#[derive(Default)]
pub struct FakeResolver {
    urls: HashMap<String, String>,
}

impl FakeResolver {
    pub fn with(mid: &str, url: &str) -> Self {
        let mut urls = HashMap::new();
        urls.insert(mid.to_string(), url.to_string());
        FakeResolver { urls }
    }
}

#[async_trait]
impl AttachmentResolver for FakeResolver {
    async fn resolve_reply_attachment(&self, message_id: &str, _access_token: &str) -> Result<String> {
        self.urls
            .get(message_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No image found in the replied message."))
    }
}

/// One recorded command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub sender_id: String,
    pub args: CommandArgs,
    pub media: Option<MediaRef>,
    pub had_event: bool,
}

/// Command that records its calls and optionally fails
pub struct RecordingCommand {
    name: String,
    role: Role,
    failure: Option<String>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingCommand {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Role::Open, None))
    }

    pub fn restricted(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Role::Restricted, None))
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Role::Open, Some(message.to_string())))
    }

    fn build(name: &str, role: Role, failure: Option<String>) -> Self {
        RecordingCommand {
            name: name.to_string(),
            role,
            failure,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Command for RecordingCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "recording test command"
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn execute(&self, ctx: CommandContext<'_>) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            sender_id: ctx.sender_id.to_string(),
            args: ctx.args.clone(),
            media: ctx.media.cloned(),
            had_event: ctx.event.is_some(),
        });

        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

/// Dispatcher wired to fakes
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub messenger: Arc<RecordingMessenger>,
    pub media: MediaContextStore,
}

pub fn harness(commands: Vec<Arc<dyn Command>>) -> Harness {
    harness_with_resolver(commands, FakeResolver::default())
}

pub fn harness_with_resolver(commands: Vec<Arc<dyn Command>>, resolver: FakeResolver) -> Harness {
    let registry = CommandRegistry::builder()
        .register_all(commands)
        .unwrap()
        .build();
    let messenger = Arc::new(RecordingMessenger::default());
    let media = MediaContextStore::default();

    let mut settings = DispatchSettings::default();
    settings.access_token = "test-token".to_string();
    settings.admin_ids.insert(ADMIN.to_string());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        media.clone(),
        Arc::new(resolver),
        messenger.clone(),
        settings,
    ));

    Harness {
        dispatcher,
        messenger,
        media,
    }
}
