//! # Feature: Media Context
//!
//! Remembers the last image and video each user sent so that a command typed in a
//! later message can operate on it. References are consumed once and expire after a
//! configurable idle period.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Compare-and-clear consumption, time-based expiry with background sweeper
//! - 1.0.0: Initial per-user image/video context

use crate::event::{Attachment, MediaKind, MediaRef};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use anyhow::Result;
use log::debug;
use std::sync::Arc;

/// Which stored references a consumption clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKinds {
    Image,
    Video,
    Both,
}

impl MediaKinds {
    fn includes(&self, kind: MediaKind) -> bool {
        match self {
            MediaKinds::Image => kind == MediaKind::Image,
            MediaKinds::Video => kind == MediaKind::Video,
            MediaKinds::Both => true,
        }
    }
}

/// References currently stored for a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredMedia {
    pub image: Option<MediaRef>,
    pub video: Option<MediaRef>,
}

impl StoredMedia {
    /// Image if present, otherwise video
    pub fn preferred(&self) -> Option<&MediaRef> {
        self.image.as_ref().or(self.video.as_ref())
    }
}

#[derive(Debug, Clone)]
struct Stamped {
    url: String,
    recorded_at: DateTime<Utc>,
}

impl Stamped {
    fn new(url: &str) -> Self {
        Stamped {
            url: url.to_string(),
            recorded_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => Utc::now() - self.recorded_at > ttl,
            None => false,
        }
    }
}

/// Per-user pending media
#[derive(Debug, Clone, Default)]
struct MediaEntry {
    image: Option<Stamped>,
    video: Option<Stamped>,
}

impl MediaEntry {
    fn slot(&mut self, kind: MediaKind) -> &mut Option<Stamped> {
        match kind {
            MediaKind::Image => &mut self.image,
            MediaKind::Video => &mut self.video,
        }
    }

    fn drop_expired(&mut self, ttl: Option<Duration>) {
        if self.image.as_ref().is_some_and(|s| s.is_expired(ttl)) {
            self.image = None;
        }
        if self.video.as_ref().is_some_and(|s| s.is_expired(ttl)) {
            self.video = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.image.is_none() && self.video.is_none()
    }
}

/// Shared store of pending media per user.
///
/// Every operation locks only the shard holding the user's entry, so operations on a
/// single user are atomic with respect to each other.
#[derive(Clone)]
pub struct MediaContextStore {
    entries: Arc<DashMap<String, MediaEntry>>,
    ttl: Option<Duration>,
}

/// Convert a TTL in minutes to a duration. 0 means no expiry.
pub fn ttl_from_minutes(minutes: u64) -> Result<Option<Duration>> {
    if minutes == 0 {
        return Ok(None);
    }
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("media context TTL of {minutes} minutes is out of range"))
}

impl Default for MediaContextStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MediaContextStore {
    /// Create a store. `ttl` of `None` keeps references until consumed.
    pub fn new(ttl: Option<Duration>) -> Self {
        MediaContextStore {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Create a store from a TTL in minutes, where 0 disables expiry
    pub fn with_ttl_minutes(minutes: u64) -> Result<Self> {
        Ok(Self::new(ttl_from_minutes(minutes)?))
    }

    /// Record the event's image and video attachments for this user, replacing whatever
    /// was stored before. Returns the event's own first image and video.
    pub fn record_if_present(&self, user_id: &str, attachments: &[Attachment]) -> StoredMedia {
        let mut own = StoredMedia::default();
        for media in attachments.iter().filter_map(Attachment::as_media) {
            match media.kind {
                MediaKind::Image if own.image.is_none() => own.image = Some(media),
                MediaKind::Video if own.video.is_none() => own.video = Some(media),
                _ => {}
            }
        }

        if own.image.is_none() && own.video.is_none() {
            return own;
        }

        let mut entry = self.entries.entry(user_id.to_string()).or_default();
        for media in [&own.image, &own.video].into_iter().flatten() {
            debug!("Recording {} context for {user_id}", media.kind.as_str());
            *entry.slot(media.kind) = Some(Stamped::new(&media.url));
        }

        own
    }

    /// Currently stored references, without clearing them
    pub fn peek(&self, user_id: &str) -> StoredMedia {
        let Some(mut entry) = self.entries.get_mut(user_id) else {
            return StoredMedia::default();
        };
        entry.drop_expired(self.ttl);

        StoredMedia {
            image: entry.image.as_ref().map(|s| MediaRef::image(&s.url)),
            video: entry.video.as_ref().map(|s| MediaRef::video(&s.url)),
        }
    }

    /// Clear the named kinds for this user
    pub fn consume(&self, user_id: &str, kinds: MediaKinds) {
        self.entries.remove_if_mut(user_id, |_, entry| {
            if kinds.includes(MediaKind::Image) {
                entry.image = None;
            }
            if kinds.includes(MediaKind::Video) {
                entry.video = None;
            }
            entry.is_empty()
        });
    }

    /// Clear the named kinds only where the stored reference still points at `used`.
    ///
    /// A reference recorded after the caller read the store has a different URL and
    /// survives. Returns whether anything was cleared.
    pub fn consume_matching(&self, user_id: &str, kinds: MediaKinds, used: &StoredMedia) -> bool {
        let mut cleared = false;
        self.entries.remove_if_mut(user_id, |_, entry| {
            for (kind, seen) in [(MediaKind::Image, &used.image), (MediaKind::Video, &used.video)] {
                if !kinds.includes(kind) {
                    continue;
                }
                let slot = entry.slot(kind);
                let matches = match (slot.as_ref(), seen) {
                    (Some(stored), Some(seen)) => stored.url == seen.url,
                    _ => false,
                };
                if matches {
                    *slot = None;
                    cleared = true;
                }
            }
            entry.is_empty()
        });
        cleared
    }

    /// Drop expired references. Returns the number of users whose context was removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.drop_expired(self.ttl);
            !entry.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of users with pending context
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the background sweeper. Does nothing when expiry is disabled.
    pub fn spawn_sweeper(&self, interval: std::time::Duration) -> Option<tokio::task::JoinHandle<()>> {
        self.ttl?;
        let store = self.clone();
        Some(tokio::spawn(async move {
            debug!("Media context sweeper started");
            loop {
                tokio::time::sleep(interval).await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!("Swept expired media context for {removed} user(s)");
                }
            }
        }))
    }

    #[cfg(test)]
    fn backdate(&self, user_id: &str, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(user_id) {
            let entry = &mut *entry;
            for stamped in [&mut entry.image, &mut entry.video].into_iter().flatten() {
                stamped.recorded_at = stamped.recorded_at - by;
            }
        }
    }
}
