//! Conversation memory
//!
//! Durable sessions, the turn-level context built on them, and export.

pub mod context;
pub mod export;
pub mod session;
pub mod store;

pub use context::{AssistantReply, ConversationContext};
pub use export::{export, Export, ExportFormat};
pub use session::{Message, Metadata, Sender, Session, SessionContext, SessionSummary};
pub use store::{BackupReport, FileSessionStore, InMemorySessionStore, ListQuery, SessionStore};
