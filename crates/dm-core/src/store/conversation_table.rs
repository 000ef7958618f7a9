use crate::models::Message;
use crate::store::OrderedIndex;
use std::collections::HashMap;
use std::sync::Arc;

/// Messages of one conversation keyed by id, ordered by `(order_ms, id)`.
pub type MessageIndex = OrderedIndex<String, Message, u64>;

fn message_order_key(message: &Message) -> u64 {
    message.order_ms()
}

pub fn new_message_index() -> MessageIndex {
    OrderedIndex::new(message_order_key)
}

/// One conversation: its message index and the last-seen marker (ms).
///
/// `messages` is shared with readers. It is never mutated in place; every
/// change swaps in a new `Arc` so readers can detect it with `Arc::ptr_eq`.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub messages: Arc<MessageIndex>,
    pub last_seen: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(new_message_index()),
            last_seen: 0,
        }
    }

    /// Swap in a new index object.
    pub fn replace_messages(&mut self, messages: MessageIndex) {
        self.messages = Arc::new(messages);
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation id -> conversation bookkeeping. No policy lives here.
pub struct ConversationTable {
    conversations: HashMap<String, Conversation>,
}

impl ConversationTable {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    // ===== Getters =====

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn get_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.get_mut(conversation_id)
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &Conversation)> {
        self.conversations.iter()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = (&String, &mut Conversation)> {
        self.conversations.iter_mut()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ===== Mutations =====

    pub fn get_or_create(&mut self, conversation_id: &str) -> &mut Conversation {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
    }

    pub fn remove(&mut self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.remove(conversation_id)
    }
}

impl Default for ConversationTable {
    fn default() -> Self {
        Self::new()
    }
}
