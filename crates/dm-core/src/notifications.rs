//! Notification target discovery from double-ratchet session records.
//!
//! The notification dispatcher needs to know which ephemeral Nostr keys our
//! peers may publish from. Those are the `their_current` / `their_next` keys
//! of every session we hold, minus our own identity.

use crate::models::{SessionState, UserRecord};

/// Every session key sighting across `user_records`, in traversal order.
///
/// Walks peer → device → session (active first, then inactive in stored
/// order) and emits `their_current_nostr_public_key` then
/// `their_next_nostr_public_key` for each session. Sessions without a state
/// are skipped. Values equal to `local_identity` are dropped when it is given;
/// no other filtering or deduplication happens here.
pub fn session_pubkeys<'a, I>(user_records: I, local_identity: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    let mut pubkeys = Vec::new();

    for user in user_records {
        for device in &user.devices {
            for session in device.sessions() {
                let Some(state) = session.state.as_ref() else {
                    tracing::trace!(
                        "notifications: skipping session {:?} without state (device {})",
                        session.name,
                        device.device_id
                    );
                    continue;
                };

                for key in session_keys(state) {
                    if local_identity == Some(key) {
                        continue;
                    }
                    pubkeys.push(key.to_string());
                }
            }
        }
    }

    pubkeys
}

fn session_keys(state: &SessionState) -> impl Iterator<Item = &str> {
    state
        .their_current_nostr_public_key
        .as_deref()
        .into_iter()
        .chain(state.their_next_nostr_public_key.as_deref())
}
