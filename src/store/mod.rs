//! Persistence layer: libSQL-backed storage for profiles, conversations,
//! resources, and knowledge passages.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ConversationMessage, Database, KnowledgeStore, ProfileStore, ResourceStore, SessionStore,
    StoredConversation,
};
