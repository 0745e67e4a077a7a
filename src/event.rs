//! Webhook payload types and the normalized [`InboundEvent`] the dispatcher works on.
//!
//! The platform posts `{ object, entry: [{ messaging: [...] }] }`. Only the fields the
//! router cares about are modelled; everything else is kept in [`InboundEvent::raw`]
//! so commands can dig into it when they need platform-specific context.

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messaging: Vec<Value>,
}

/// Shape of a single messaging event as delivered by the platform
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingEvent {
    pub sender: Option<Participant>,
    pub message: Option<MessagePayload>,
    pub postback: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    pub mid: Option<String>,
    pub text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<RawAttachment>,
    pub reply_to: Option<ReplyTo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentPayload {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyTo {
    pub mid: Option<String>,
}

/// The platform sends `null` for some empty lists
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Kind of media an attachment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// A dereferenceable media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        MediaRef {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        MediaRef {
            kind: MediaKind::Video,
            url: url.into(),
        }
    }
}

/// Attachment on an inbound message. Only images and videos with a URL are usable media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: String,
    pub url: Option<String>,
}

impl Attachment {
    pub fn new(kind: impl Into<String>, url: Option<&str>) -> Self {
        Attachment {
            kind: kind.into(),
            url: url.map(str::to_string),
        }
    }

    /// Convert to a media reference if this is an image or video with a URL
    pub fn as_media(&self) -> Option<MediaRef> {
        let url = self.url.as_deref()?;
        match self.kind.as_str() {
            "image" => Some(MediaRef::image(url)),
            "video" => Some(MediaRef::video(url)),
            _ => None,
        }
    }
}

/// Normalized view of one platform message
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub sender_id: Option<String>,
    pub message_id: Option<String>,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<String>,
    /// The messaging event exactly as the platform sent it
    pub raw: Value,
}

impl InboundEvent {
    /// Build an event for a sender with the given text (used by tests and tooling)
    pub fn text(sender_id: &str, text: &str) -> Self {
        InboundEvent {
            sender_id: Some(sender_id.to_string()),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, kind: &str, url: &str) -> Self {
        self.attachments.push(Attachment::new(kind, Some(url)));
        self
    }

    pub fn with_reply_to(mut self, mid: &str) -> Self {
        self.reply_to = Some(mid.to_string());
        self
    }

    /// Normalize a raw messaging event. Returns `None` for events that carry no message
    /// (postbacks, deliveries, reads) and for events that do not parse.
    pub fn from_messaging(raw: Value) -> Option<Self> {
        let parsed: MessagingEvent = match serde_json::from_value(raw.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Invalid messaging event ({e}): {raw}");
                return None;
            }
        };
        let message = parsed.message?;

        Some(InboundEvent {
            sender_id: parsed
                .sender
                .and_then(|s| s.id)
                .filter(|id| !id.is_empty()),
            message_id: message.mid,
            text: message.text,
            attachments: message
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    kind: a.kind,
                    url: a.payload.and_then(|p| p.url),
                })
                .collect(),
            reply_to: message.reply_to.and_then(|r| r.mid).filter(|m| !m.is_empty()),
            raw,
        })
    }
}
