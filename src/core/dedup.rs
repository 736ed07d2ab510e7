//! Duplicate message suppression
//!
//! A send is fingerprinted from its sender, normalized content and attachment
//! URLs. A second
//! send with the same fingerprint inside the window is a duplicate. Expiry is
//! checked on every lookup, so the periodic purge only reclaims memory.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::core::clock::SharedClock;
use crate::core::message::Attachment;

pub type Fingerprint = [u8; 32];

/// Trim and collapse runs of whitespace so trivially re-spaced resends match
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint(user_id: &str, content: &str, attachments: &[Attachment]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    // Separator keeps ("ab", "c") and ("a", "bc") apart
    hasher.update([0u8]);
    hasher.update(normalize_content(content).as_bytes());
    for attachment in attachments {
        hasher.update([0u8]);
        hasher.update(attachment.url.as_bytes());
    }
    hasher.finalize().into()
}

pub struct DuplicateSuppressor {
    first_seen: DashMap<Fingerprint, Instant>,
    window: Duration,
    clock: SharedClock,
}

impl DuplicateSuppressor {
    pub fn new(window: Duration, clock: SharedClock) -> Self {
        Self {
            first_seen: DashMap::new(),
            window,
            clock,
        }
    }

    /// Returns true when the send repeats one seen within the window.
    /// A non-duplicate is recorded as the new first sighting.
    pub fn check_and_record(
        &self,
        user_id: &str,
        content: &str,
        attachments: &[Attachment],
    ) -> bool {
        let now = self.clock.now();
        match self.first_seen.entry(fingerprint(user_id, content, attachments)) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.window {
                    true
                } else {
                    entry.insert(now);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    /// Drop every fingerprint whose window has elapsed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.first_seen.len();
        self.first_seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < self.window);
        before.saturating_sub(self.first_seen.len())
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
