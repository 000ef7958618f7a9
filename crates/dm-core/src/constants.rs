//! Application-wide constants
//!
//! Centralized location for tag names, scheduler bounds and storage
//! settings that are used across multiple modules.

use std::time::Duration;

// Tag names understood by the store
/// NIP-40 expiration tag: `["expiration", "<unix-seconds>"]`
pub const EXPIRATION_TAG: &str = "expiration";
/// Client-assigned millisecond timestamp: `["ms", "<unix-millis>"]`
pub const MS_TAG: &str = "ms";

// Expiration scheduler bounds
/// Shortest delay between two purge passes. Guards against tight loops when a
/// deadline slipped into the past.
pub const MIN_PURGE_DELAY: Duration = Duration::from_secs(1);
/// Longest delay between two purge passes, also used when nothing expires.
pub const MAX_PURGE_DELAY: Duration = Duration::from_secs(60);

// Persistence
/// Default debounce window for write-through of dirty conversations.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Length of a hex-encoded conversation id / pubkey.
pub const PUBKEY_HEX_LEN: usize = 64;

// Nostr event kinds seen in private conversations
pub mod kinds {
    /// NIP-17 chat message
    pub const CHAT_MESSAGE: u16 = 14;
    /// NIP-17 file message
    pub const FILE_MESSAGE: u16 = 15;
    /// Reaction
    pub const REACTION: u16 = 7;
}
