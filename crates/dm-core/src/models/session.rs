//! Read-only view of the transport layer's double-ratchet session records.
//!
//! Only the key-rotation fields needed for notification routing are modelled;
//! everything else about a session stays inside the transport layer.

use serde::{Deserialize, Serialize};

/// Ratchet bookkeeping of a single session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, alias = "theirCurrentNostrPublicKey")]
    pub their_current_nostr_public_key: Option<String>,
    #[serde(default, alias = "theirNextNostrPublicKey")]
    pub their_next_nostr_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub name: String,
    /// Missing when the transport layer has not finished setting the session up.
    #[serde(default)]
    pub state: Option<SessionState>,
}

/// One device of a peer: at most one active session plus older ones kept
/// around to decrypt late messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default, alias = "deviceId")]
    pub device_id: String,
    #[serde(default, alias = "activeSession")]
    pub active_session: Option<SessionRecord>,
    #[serde(default, alias = "inactiveSessions")]
    pub inactive_sessions: Vec<SessionRecord>,
}

impl DeviceRecord {
    /// Active session first, then inactive ones in stored order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.active_session
            .iter()
            .chain(self.inactive_sessions.iter())
    }
}

/// All devices known for one peer identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, alias = "publicKey")]
    pub public_key: String,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}
