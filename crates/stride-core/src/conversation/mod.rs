//! Conversation storage: repository trait and the write-serializing
//! service layer.

pub mod repository;
pub mod service;

pub use repository::ConversationRepository;
pub use service::ConversationService;
