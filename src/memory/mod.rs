//! Session Memory
//!
//! Conversation history plus the context window handed to the language model

pub mod context_manager;
pub mod store;

pub use context_manager::{ContextConfig, ContextManager};
pub use store::{ConversationHistory, ConversationMessage, MessageRole};
