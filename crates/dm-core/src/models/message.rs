use nostr::UnsignedEvent;
use serde::{Deserialize, Serialize};

use super::tag_utils::{expiration_secs, extract_all_tag_values, ms_timestamp};

/// Delivery / read state of a private message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Seen,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
            MessageStatus::Failed => "failed",
        }
    }
}

/// A decrypted direct message as handed over by the session layer.
///
/// Treated as immutable by convention: the store never edits a message that a
/// reader may hold; updates clone, patch and re-insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    /// Signing key of the event. May be a secondary device key.
    #[serde(default)]
    pub pubkey: String,
    /// Logical author when the message was relayed by a secondary device.
    #[serde(default, alias = "ownerPubkey")]
    pub owner_pubkey: Option<String>,
    /// Protocol timestamp in seconds. Not unique.
    #[serde(default, alias = "createdAt")]
    pub created_at: u64,
    #[serde(default)]
    pub kind: u16,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
}

impl Message {
    pub fn new(id: impl Into<String>, pubkey: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            pubkey: pubkey.into(),
            owner_pubkey: None,
            created_at,
            kind: crate::constants::kinds::CHAT_MESSAGE,
            content: String::new(),
            tags: Vec::new(),
            status: None,
        }
    }

    /// Parse a message record from JSON, substituting defaults for missing fields.
    /// Returns None only when the payload is not a JSON object at all.
    pub fn from_json(json: &str) -> Option<Self> {
        match serde_json::from_str::<Message>(json) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("message: dropping unparseable record: {}", e);
                None
            }
        }
    }

    /// Build a message from a decrypted NIP-17 rumor.
    pub fn from_rumor(rumor: &UnsignedEvent) -> Self {
        Self {
            id: rumor.id.map(|id| id.to_hex()).unwrap_or_default(),
            pubkey: rumor.pubkey.to_hex(),
            owner_pubkey: None,
            created_at: rumor.created_at.as_u64(),
            kind: rumor.kind.as_u16(),
            content: rumor.content.clone(),
            tags: rumor.tags.iter().map(|t| t.as_slice().to_vec()).collect(),
            status: None,
        }
    }

    /// Logical author: `owner_pubkey` when present, otherwise `pubkey`.
    pub fn author(&self) -> &str {
        self.owner_pubkey.as_deref().unwrap_or(&self.pubkey)
    }

    /// Whether the logical author is `identity`. Never compare raw `pubkey`.
    pub fn is_from(&self, identity: &str) -> bool {
        self.author() == identity
    }

    /// Ordering timestamp in milliseconds: the `ms` tag, else `created_at * 1000`.
    pub fn order_ms(&self) -> u64 {
        ms_timestamp(&self.tags).unwrap_or_else(|| self.created_at.saturating_mul(1000))
    }

    /// Absolute deadline in unix seconds, if the message carries an expiration tag.
    pub fn expires_at(&self) -> Option<u64> {
        expiration_secs(&self.tags)
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at().is_some_and(|deadline| deadline <= now_secs)
    }

    /// Pubkeys referenced by `p` tags (recipients of the rumor).
    pub fn p_tags(&self) -> Vec<String> {
        extract_all_tag_values(&self.tags, "p")
    }

    /// Merge `patch` into this message. Returns true if any field changed.
    pub fn apply(&mut self, patch: &MessagePatch) -> bool {
        let mut changed = false;

        if let Some(status) = patch.status {
            if self.status != Some(status) {
                self.status = Some(status);
                changed = true;
            }
        }
        if let Some(ref content) = patch.content {
            if &self.content != content {
                self.content = content.clone();
                changed = true;
            }
        }
        if let Some(ref tags) = patch.tags {
            if &self.tags != tags {
                self.tags = tags.clone();
                changed = true;
            }
        }
        if let Some(ref owner) = patch.owner_pubkey {
            if self.owner_pubkey.as_ref() != Some(owner) {
                self.owner_pubkey = Some(owner.clone());
                changed = true;
            }
        }

        changed
    }
}

/// Partial update for an existing message. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub status: Option<MessageStatus>,
    pub content: Option<String>,
    pub tags: Option<Vec<Vec<String>>>,
    pub owner_pubkey: Option<String>,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.owner_pubkey.is_none()
    }
}
