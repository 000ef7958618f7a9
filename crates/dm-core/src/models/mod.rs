pub mod message;
pub mod session;
pub mod tag_utils;

pub use message::{Message, MessagePatch, MessageStatus};
pub use session::{DeviceRecord, SessionRecord, SessionState, UserRecord};
