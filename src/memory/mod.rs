//! 记忆层：短期（会话状态）、长期（档案事实与检索）

pub mod conversation;
pub mod long_term;

pub use conversation::{ConversationState, ListingState, Message, Role, Turn};
pub use long_term::{FactStore, InMemoryFactStore, NoopFactStore};
