pub mod conversation_table;
pub mod message_store;
pub mod ordered_index;
pub mod persistence;

pub use conversation_table::{Conversation, ConversationTable, MessageIndex};
pub use message_store::{is_valid_conversation_id, MessageStore};
pub use ordered_index::OrderedIndex;
pub use persistence::{
    ConversationSnapshot, KvBackend, MemoryKv, SqliteKv, StoreError, SNAPSHOT_SCHEMA_VERSION,
};
