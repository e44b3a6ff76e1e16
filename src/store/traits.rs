//! Narrow async store capabilities.
//!
//! Each pipeline collaborator depends only on the slice it uses; `Database`
//! is the union implemented by the libSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::knowledge::KnowledgeChunk;
use crate::pipeline::ConversationState;
use crate::profile::UserProfile;
use crate::resources::Resource;

/// A conversation message from the database.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted per-session state with its optimistic-concurrency version.
#[derive(Debug, Clone)]
pub struct StoredConversation {
    pub session_id: String,
    pub user_id: String,
    pub state: ConversationState,
    pub version: i64,
    pub last_activity: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `DatabaseError::NotFound` when no record exists.
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, DatabaseError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_conversation(&self, session_id: &str) -> Result<Option<StoredConversation>, DatabaseError>;

    /// Write `state` if the stored version equals `expected_version` (0 for a
    /// new session). Returns the new version, or `VersionConflict`.
    async fn save_conversation(
        &self,
        session_id: &str,
        user_id: &str,
        state: &ConversationState,
        expected_version: i64,
    ) -> Result<i64, DatabaseError>;

    async fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<(), DatabaseError>;

    /// Messages in the order they were written.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>, DatabaseError>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<Resource>, DatabaseError>;

    async fn insert_resource(&self, resource: &Resource) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Replace every stored chunk of `document_id` with `chunks`.
    async fn replace_document_chunks(
        &self,
        document_id: &str,
        chunks: &[KnowledgeChunk],
    ) -> Result<(), DatabaseError>;

    /// All chunks in insertion order.
    async fn list_chunks(&self) -> Result<Vec<KnowledgeChunk>, DatabaseError>;
}

/// Backend-agnostic database covering every store capability.
#[async_trait]
pub trait Database: ProfileStore + SessionStore + ResourceStore + KnowledgeStore {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
