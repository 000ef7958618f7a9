use crate::constants::PUBKEY_HEX_LEN;
use crate::events::{Observers, StoreChange, Subscription};
use crate::models::{Message, MessagePatch};
use crate::store::conversation_table::{ConversationTable, MessageIndex};
use crate::store::persistence::{
    decode_snapshot, encode_snapshot, ConversationSnapshot, KvBackend, StoreError,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// True for 64-char lowercase hex strings (pubkeys / conversation ids).
pub fn is_valid_conversation_id(id: &str) -> bool {
    id.len() == PUBKEY_HEX_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Authoritative in-memory view of decrypted direct messages.
///
/// Every mutation runs to completion under the table lock, so readers never see
/// a half-applied change. Persistence is write-behind: mutations only mark the
/// conversation dirty, and `flush` (driven by the runtime's debounced flush
/// task) writes it out.
pub struct MessageStore {
    table: Mutex<ConversationTable>,
    backend: Option<Arc<dyn KvBackend>>,
    dirty: Mutex<HashSet<String>>,
    flush_requested: Notify,
    /// Serializes backend writes with `clear` / `remove_conversation`.
    write_lock: Mutex<()>,
    hydrated: watch::Sender<bool>,
    observers: Arc<Observers>,
}

impl MessageStore {
    /// Store backed by durable storage. Not hydrated until `hydrate` runs.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self::build(Some(backend), false)
    }

    /// Volatile store. Hydration is trivially complete.
    pub fn in_memory() -> Self {
        Self::build(None, true)
    }

    fn build(backend: Option<Arc<dyn KvBackend>>, hydrated: bool) -> Self {
        let (hydrated, _) = watch::channel(hydrated);
        Self {
            table: Mutex::new(ConversationTable::new()),
            backend,
            dirty: Mutex::new(HashSet::new()),
            flush_requested: Notify::new(),
            write_lock: Mutex::new(()),
            hydrated,
            observers: Arc::new(Observers::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    // ===== Getters =====

    /// Current message index of a conversation. Compare with `Arc::ptr_eq`
    /// to detect change.
    pub fn messages(&self, conversation_id: &str) -> Option<Arc<MessageIndex>> {
        self.table
            .lock()
            .get(conversation_id)
            .map(|c| Arc::clone(&c.messages))
    }

    pub fn message(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        self.table
            .lock()
            .get(conversation_id)
            .and_then(|c| c.messages.get(&message_id.to_string()).cloned())
    }

    pub fn latest_message(&self, conversation_id: &str) -> Option<Message> {
        self.table
            .lock()
            .get(conversation_id)
            .and_then(|c| c.messages.last().cloned())
    }

    pub fn last_seen(&self, conversation_id: &str) -> Option<u64> {
        self.table.lock().get(conversation_id).map(|c| c.last_seen)
    }

    /// Sorted ids of every known conversation, including empty ones.
    pub fn conversation_ids(&self) -> Vec<String> {
        self.table.lock().ids()
    }

    pub fn conversation_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Messages newer than the last-seen marker that `local_identity` did not author.
    pub fn unread_count(&self, conversation_id: &str, local_identity: &str) -> usize {
        let table = self.table.lock();
        let Some(conversation) = table.get(conversation_id) else {
            return 0;
        };

        conversation
            .messages
            .values()
            .rev()
            .take_while(|m| m.order_ms() > conversation.last_seen)
            .filter(|m| !m.is_from(local_identity))
            .count()
    }

    /// Earliest expiration deadline strictly after `now_secs`, across all conversations.
    pub fn next_expiration_after(&self, now_secs: u64) -> Option<u64> {
        let table = self.table.lock();
        table
            .all()
            .flat_map(|(_, c)| c.messages.values().filter_map(Message::expires_at))
            .filter(|deadline| *deadline > now_secs)
            .min()
    }

    // ===== Mutations =====

    /// Insert or replace `message` in its conversation, creating the
    /// conversation if needed. Returns false when nothing changed.
    ///
    /// A message authored (after owner resolution) by `local_identity` also
    /// advances the last-seen marker: our own messages are never unread.
    pub fn upsert(&self, conversation_id: &str, local_identity: &str, message: Message) -> bool {
        if !is_valid_conversation_id(conversation_id) {
            tracing::warn!(
                "message_store: ignoring message for invalid conversation id {:?}",
                conversation_id
            );
            return false;
        }
        if message.id.is_empty() {
            tracing::debug!(
                "message_store: ignoring message without id in {}",
                conversation_id
            );
            return false;
        }

        {
            let mut table = self.table.lock();
            let conversation = table.get_or_create(conversation_id);

            let unchanged = conversation.messages.get(&message.id) == Some(&message);
            let advance_seen = message.is_from(local_identity)
                && message.order_ms() > conversation.last_seen;

            if unchanged && !advance_seen {
                return false;
            }

            if advance_seen {
                conversation.last_seen = message.order_ms();
            }
            if !unchanged {
                let mut next = (*conversation.messages).clone();
                next.set(message.id.clone(), message);
                conversation.replace_messages(next);
            }
        }

        self.committed(conversation_id);
        true
    }

    /// Merge `patch` into an existing message. No-op when the conversation or
    /// message is unknown, or when the patch changes nothing.
    pub fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: &MessagePatch,
    ) -> bool {
        {
            let mut table = self.table.lock();
            let Some(conversation) = table.get_mut(conversation_id) else {
                return false;
            };
            let key = message_id.to_string();
            let Some(mut message) = conversation.messages.get(&key).cloned() else {
                return false;
            };
            if !message.apply(patch) {
                return false;
            }

            let mut next = (*conversation.messages).clone();
            next.set(key, message);
            conversation.replace_messages(next);
        }

        self.committed(conversation_id);
        true
    }

    pub fn delete_message(&self, conversation_id: &str, message_id: &str) -> bool {
        {
            let mut table = self.table.lock();
            let Some(conversation) = table.get_mut(conversation_id) else {
                return false;
            };
            let key = message_id.to_string();
            if !conversation.messages.contains_key(&key) {
                return false;
            }

            let mut next = (*conversation.messages).clone();
            next.delete(&key);
            conversation.replace_messages(next);
        }

        self.committed(conversation_id);
        true
    }

    /// Advance the last-seen marker (ms). Never moves backwards.
    pub fn mark_seen(&self, conversation_id: &str, at_ms: u64) -> bool {
        {
            let mut table = self.table.lock();
            let Some(conversation) = table.get_mut(conversation_id) else {
                return false;
            };
            if at_ms <= conversation.last_seen {
                return false;
            }
            conversation.last_seen = at_ms;
        }

        self.committed(conversation_id);
        true
    }

    /// Remove every message whose expiration deadline is `<= now_secs`.
    /// Conversations without expired messages keep their index object.
    /// Returns the number of messages removed.
    pub fn purge_expired(&self, now_secs: u64) -> usize {
        let (removed, touched) = self.remove_expired(now_secs);
        self.publish(&touched);
        removed
    }

    /// The mutating half of `purge_expired`: removes expired messages and marks
    /// the touched conversations dirty, but notifies nobody. Callers holding
    /// their own locks pass the returned ids to `publish` once released.
    pub(crate) fn remove_expired(&self, now_secs: u64) -> (usize, Vec<String>) {
        let mut touched: Vec<String> = Vec::new();
        let mut removed = 0;

        {
            let mut table = self.table.lock();
            for (conversation_id, conversation) in table.all_mut() {
                if !conversation.messages.values().any(|m| m.is_expired(now_secs)) {
                    continue;
                }

                let mut next = (*conversation.messages).clone();
                removed += next.retain(|_, m| !m.is_expired(now_secs));
                conversation.replace_messages(next);
                touched.push(conversation_id.clone());
            }
        }

        if removed > 0 {
            tracing::debug!(
                "message_store: purged {} expired message(s) from {} conversation(s)",
                removed,
                touched.len()
            );
        }

        for conversation_id in &touched {
            self.mark_dirty(conversation_id);
        }

        (removed, touched)
    }

    pub(crate) fn publish(&self, conversation_ids: &[String]) {
        for conversation_id in conversation_ids {
            self.observers
                .notify(&StoreChange::Conversation(conversation_id.clone()));
        }
    }

    /// Drop one conversation and its persisted copy.
    pub fn remove_conversation(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let (existed, result) = {
            let _write = self.write_lock.lock();
            let existed = self.table.lock().remove(conversation_id).is_some();
            self.dirty.lock().remove(conversation_id);

            let result = match &self.backend {
                Some(backend) => backend.delete(conversation_id),
                None => Ok(()),
            };
            (existed, result)
        };

        if existed {
            self.observers
                .notify(&StoreChange::ConversationRemoved(conversation_id.to_string()));
        }

        result.map(|()| existed)
    }

    /// Reset every conversation and last-seen marker, drop pending writes and
    /// wipe persisted state. Waits for an in-flight flush to finish first.
    ///
    /// The in-memory reset happens even if wiping storage fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        let result = {
            let _write = self.write_lock.lock();
            self.dirty.lock().clear();
            self.table.lock().clear();

            match &self.backend {
                Some(backend) => backend.clear(),
                None => Ok(()),
            }
        };

        tracing::info!("message_store: cleared");
        self.observers.notify(&StoreChange::Cleared);

        if let Err(ref e) = result {
            tracing::warn!("message_store: failed to wipe persisted conversations: {}", e);
        }
        result
    }

    fn committed(&self, conversation_id: &str) {
        self.mark_dirty(conversation_id);
        self.observers
            .notify(&StoreChange::Conversation(conversation_id.to_string()));
    }

    fn mark_dirty(&self, conversation_id: &str) {
        if self.backend.is_some() {
            self.dirty.lock().insert(conversation_id.to_string());
            self.flush_requested.notify_one();
        }
    }

    // ===== Persistence =====

    pub fn has_pending_writes(&self) -> bool {
        !self.dirty.lock().is_empty()
    }

    /// Resolves when at least one conversation became dirty since the last wait.
    pub async fn flush_requested(&self) {
        self.flush_requested.notified().await;
    }

    /// Write every dirty conversation to the backend. Returns how many were written.
    ///
    /// Failed conversations stay dirty and are retried on the next flush; the
    /// in-memory state is never rolled back. Before hydration completes this
    /// writes nothing: a conversation upserted during startup would otherwise
    /// overwrite its persisted history before `hydrate` could merge it.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        if !self.is_hydrated() {
            tracing::debug!("message_store: flush deferred until hydration completes");
            return Ok(0);
        }

        let _write = self.write_lock.lock();
        let pending: Vec<String> = self.dirty.lock().drain().collect();

        let mut written = 0;
        let mut failed = 0;
        let mut last_error = None;

        for conversation_id in pending {
            let snapshot = self
                .table
                .lock()
                .get(&conversation_id)
                .map(|c| (c.last_seen, Arc::clone(&c.messages)));

            let result = match snapshot {
                Some((last_seen, messages)) => encode_snapshot(ConversationSnapshot {
                    last_seen,
                    messages: messages.values().cloned().collect(),
                })
                .and_then(|bytes| backend.put(&conversation_id, &bytes)),
                None => backend.delete(&conversation_id),
            };

            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(
                        "message_store: failed to persist conversation {}: {}",
                        conversation_id,
                        e
                    );
                    self.dirty.lock().insert(conversation_id);
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(StoreError::Flush {
                failed,
                last: Box::new(last),
            }),
            None => Ok(written),
        }
    }

    /// Load persisted conversations into memory, then mark hydration complete.
    ///
    /// Messages already upserted during startup win over persisted copies with
    /// the same id. Hydration is marked complete even when loading fails.
    pub fn hydrate(&self) -> Result<usize, StoreError> {
        let result = match &self.backend {
            Some(backend) => self.load_persisted(backend.as_ref()),
            None => Ok(0),
        };

        match &result {
            Ok(loaded) => tracing::info!("message_store: hydrated {} conversation(s)", loaded),
            Err(e) => tracing::warn!("message_store: hydration failed: {}", e),
        }

        self.hydrated.send_replace(true);
        if self.has_pending_writes() {
            self.flush_requested.notify_one();
        }
        result
    }

    fn load_persisted(&self, backend: &dyn KvBackend) -> Result<usize, StoreError> {
        let mut loaded = 0;

        for conversation_id in backend.keys()? {
            if !is_valid_conversation_id(&conversation_id) {
                continue;
            }

            let bytes = match backend.get(&conversation_id) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        "message_store: failed to read conversation {}: {}",
                        conversation_id,
                        e
                    );
                    continue;
                }
            };

            let Some(snapshot) = decode_snapshot(&bytes) else {
                if let Err(e) = backend.delete(&conversation_id) {
                    tracing::warn!(
                        "message_store: failed to drop unreadable conversation {}: {}",
                        conversation_id,
                        e
                    );
                }
                continue;
            };

            let merged = {
                let mut table = self.table.lock();
                let existed = table.get(&conversation_id).is_some();
                let conversation = table.get_or_create(&conversation_id);
                conversation.last_seen = conversation.last_seen.max(snapshot.last_seen);

                let mut next = (*conversation.messages).clone();
                for message in snapshot.messages {
                    if message.id.is_empty() || next.contains_key(&message.id) {
                        continue;
                    }
                    next.set(message.id.clone(), message);
                }
                conversation.replace_messages(next);
                existed
            };

            // Startup upserts only live in memory so far; write back the union.
            if merged {
                self.mark_dirty(&conversation_id);
            }

            loaded += 1;
            self.observers
                .notify(&StoreChange::Conversation(conversation_id));
        }

        Ok(loaded)
    }

    pub fn is_hydrated(&self) -> bool {
        *self.hydrated.borrow()
    }

    /// Resolves once `hydrate` has completed (immediately for in-memory stores).
    pub async fn await_hydration(&self) {
        let mut rx = self.hydrated.subscribe();
        loop {
            let done = *rx.borrow_and_update();
            if done {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
