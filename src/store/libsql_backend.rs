//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::knowledge::KnowledgeChunk;
use crate::pipeline::ConversationState;
use crate::profile::UserProfile;
use crate::resources::{Resource, ResourceKind};
use crate::store::migrations;
use crate::store::traits::{
    ConversationMessage, Database, KnowledgeStore, ProfileStore, ResourceStore, SessionStore,
    StoredConversation,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn conversation_version(&self, session_id: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT version FROM conversations WHERE id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("conversation_version: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get(0).unwrap_or(0)),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("conversation_version: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a UserProfile.
fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, DatabaseError> {
    let diagnoses: String = row.get(7).unwrap_or_else(|_| "[]".to_string());
    let prior_diagnoses = serde_json::from_str(&diagnoses)
        .map_err(|e| DatabaseError::Serialization(format!("prior_diagnoses: {e}")))?;

    Ok(UserProfile {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("profile id: {e}")))?,
        name: row.get(1).ok(),
        age: row.get::<i64>(2).ok().and_then(|a| u32::try_from(a).ok()),
        gender: row.get(3).ok(),
        region: row.get(4).ok(),
        profession: row.get(5).ok(),
        marital_status: row.get(6).ok(),
        prior_diagnoses,
        ethnicity: row.get(8).ok(),
    })
}

/// Map a libsql Row to a Resource.
fn row_to_resource(row: &libsql::Row) -> Result<Resource, DatabaseError> {
    let kind: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("resource kind: {e}")))?;
    Ok(Resource {
        name: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("resource name: {e}")))?,
        phone: row.get(1).ok(),
        website: row.get(2).ok(),
        hours: row.get(3).ok(),
        description: row.get(4).unwrap_or_default(),
        kind: kind.parse::<ResourceKind>().map_err(DatabaseError::Serialization)?,
        region: row
            .get(6)
            .map_err(|e| DatabaseError::Query(format!("resource region: {e}")))?,
    })
}

/// Map a libsql Row to a KnowledgeChunk.
fn row_to_chunk(row: &libsql::Row) -> Result<KnowledgeChunk, DatabaseError> {
    let embedding: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("chunk embedding: {e}")))?;
    let ordinal: i64 = row.get(1).unwrap_or(0);
    Ok(KnowledgeChunk {
        document_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("chunk document_id: {e}")))?,
        ordinal: u32::try_from(ordinal).unwrap_or_default(),
        title: row.get(2).ok(),
        source: row.get(3).ok(),
        text: row.get(4).unwrap_or_default(),
        embedding: serde_json::from_str(&embedding)
            .map_err(|e| DatabaseError::Serialization(format!("chunk embedding: {e}")))?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const PROFILE_COLUMNS: &str =
    "id, name, age, gender, region, profession, marital_status, prior_diagnoses, ethnicity";

const RESOURCE_COLUMNS: &str = "name, phone, website, hours, description, kind, region";

const CHUNK_COLUMNS: &str = "document_id, ordinal, title, source, text, embedding";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

// ── Profiles ────────────────────────────────────────────────────────

#[async_trait]
impl ProfileStore for LibSqlBackend {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_profile(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "user_profile".to_string(),
                id: user_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let diagnoses = serde_json::to_string(&profile.prior_diagnoses)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let age = match profile.age {
            Some(age) => libsql::Value::Integer(i64::from(age)),
            None => libsql::Value::Null,
        };
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO user_profiles
                    (id, name, age, gender, region, profession, marital_status, prior_diagnoses, ethnicity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    age = excluded.age,
                    gender = excluded.gender,
                    region = excluded.region,
                    profession = excluded.profession,
                    marital_status = excluded.marital_status,
                    prior_diagnoses = excluded.prior_diagnoses,
                    ethnicity = excluded.ethnicity,
                    updated_at = ?10",
                params![
                    profile.id.as_str(),
                    opt_text(profile.name.as_deref()),
                    age,
                    opt_text(profile.gender.as_deref()),
                    opt_text(profile.region.as_deref()),
                    opt_text(profile.profession.as_deref()),
                    opt_text(profile.marital_status.as_deref()),
                    diagnoses,
                    opt_text(profile.ethnicity.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_profile: {e}")))?;

        debug!(user_id = %profile.id, "Profile saved");
        Ok(())
    }
}

// ── Conversations ───────────────────────────────────────────────────

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn load_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<StoredConversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, state, version, last_activity
                 FROM conversations WHERE id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_conversation: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("load_conversation: {e}"))),
        };

        let state_str: String = row.get(2).unwrap_or_else(|_| "{}".to_string());
        let state: ConversationState = serde_json::from_str(&state_str)
            .map_err(|e| DatabaseError::Serialization(format!("conversation state: {e}")))?;
        let activity: String = row.get(4).unwrap_or_default();

        Ok(Some(StoredConversation {
            session_id: row.get(0).unwrap_or_else(|_| session_id.to_string()),
            user_id: row.get(1).unwrap_or_default(),
            state,
            version: row.get(3).unwrap_or(0),
            last_activity: parse_datetime(&activity),
        }))
    }

    async fn save_conversation(
        &self,
        session_id: &str,
        user_id: &str,
        state: &ConversationState,
        expected_version: i64,
    ) -> Result<i64, DatabaseError> {
        let state_str =
            serde_json::to_string(state).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let changed = if expected_version == 0 {
            conn.execute(
                "INSERT INTO conversations (id, user_id, state, version, last_activity)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (id) DO NOTHING",
                params![session_id, user_id, state_str, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_conversation: {e}")))?
        } else {
            conn.execute(
                "UPDATE conversations
                 SET state = ?3, version = version + 1, last_activity = ?4
                 WHERE id = ?1 AND version = ?2",
                params![session_id, expected_version, state_str, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_conversation: {e}")))?
        };

        if changed == 0 {
            let found = self.conversation_version(session_id).await?;
            return Err(DatabaseError::VersionConflict {
                entity: "conversation".to_string(),
                id: session_id.to_string(),
                expected: expected_version,
                found,
            });
        }
        Ok(expected_version + 1)
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO conversation_messages (id, conversation_id, role, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), session_id, role, content],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message: {e}")))?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role, content, created_at FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY rowid ASC",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let created_str: String = row.get(2).unwrap_or_default();
            messages.push(ConversationMessage {
                role: row.get(0).unwrap_or_default(),
                content: row.get(1).unwrap_or_default(),
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(messages)
    }
}

// ── Resources ───────────────────────────────────────────────────────

#[async_trait]
impl ResourceStore for LibSqlBackend {
    async fn list_resources(&self) -> Result<Vec<Resource>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_resources: {e}")))?;

        let mut resources = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            resources.push(row_to_resource(&row)?);
        }
        Ok(resources)
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO resources (id, name, phone, website, hours, description, kind, region)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    resource.name.as_str(),
                    opt_text(resource.phone.as_deref()),
                    opt_text(resource.website.as_deref()),
                    opt_text(resource.hours.as_deref()),
                    resource.description.as_str(),
                    resource.kind.to_string(),
                    resource.region.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_resource: {e}")))?;
        Ok(())
    }
}

// ── Knowledge ───────────────────────────────────────────────────────

#[async_trait]
impl KnowledgeStore for LibSqlBackend {
    async fn replace_document_chunks(
        &self,
        document_id: &str,
        chunks: &[KnowledgeChunk],
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_document_chunks: {e}")))?;

        tx.execute(
            "DELETE FROM knowledge_chunks WHERE document_id = ?1",
            params![document_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("replace_document_chunks: {e}")))?;

        for chunk in chunks {
            let embedding = serde_json::to_string(&chunk.embedding)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO knowledge_chunks (document_id, ordinal, title, source, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    document_id,
                    i64::from(chunk.ordinal),
                    opt_text(chunk.title.as_deref()),
                    opt_text(chunk.source.as_deref()),
                    chunk.text.as_str(),
                    embedding,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert chunk: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_document_chunks commit: {e}")))?;
        debug!(document_id, count = chunks.len(), "Stored knowledge chunks");
        Ok(())
    }

    async fn list_chunks(&self) -> Result<Vec<KnowledgeChunk>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CHUNK_COLUMNS} FROM knowledge_chunks ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chunks: {e}")))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(row_to_chunk(&row)?);
        }
        Ok(chunks)
    }
}
