//! Private-message store and expiration engine for a Nostr client.
//!
//! Decrypted direct messages are kept in per-conversation ordered indexes,
//! persisted write-behind to a key-value backend, and purged once their NIP-40
//! expiration deadline passes.

pub mod config;
pub mod constants;
pub mod events;
pub mod expiration;
pub mod models;
pub mod notifications;
pub mod runtime;
pub mod store;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use events::{StoreChange, Subscription};
pub use expiration::{Clock, ExpirationScheduler, ManualClock, SystemClock};
pub use models::{Message, MessagePatch, MessageStatus, UserRecord};
pub use notifications::session_pubkeys;
pub use runtime::CoreRuntime;
pub use store::{MessageStore, StoreError};
