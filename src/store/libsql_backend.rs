//! libSQL backend — async `ConversationStore` implementation.
//!
//! Supports local file and in-memory databases. Transcripts are stored
//! as JSON columns and typed as [`Transcript`] end to end.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::{ActiveConversation, PreviousConversation, Transcript, User};
use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::ConversationStore;

const USER_COLUMNS: &str = "id, phone_number, name, persona, created_at";
const ACTIVE_COLUMNS: &str = "user_id, interview, feedback, created_at, updated_at";
const PREVIOUS_COLUMNS: &str = "id, user_id, interview, feedback, created_at";

/// libSQL store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async
/// use. Multi-row mutations run in explicit transactions.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: LibSqlDatabase,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self { db, conn };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn open_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self { db, conn };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string (our canonical write format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn transcript_to_json(transcript: &Transcript) -> Result<String, StoreError> {
    serde_json::to_string(transcript).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn transcript_from_json(json: &str) -> Result<Transcript, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map an insert error, surfacing UNIQUE violations as `Constraint`.
fn map_insert_err(op: &str, e: libsql::Error) -> StoreError {
    let message = e.to_string();
    if message.contains("UNIQUE") {
        StoreError::Constraint(format!("{op}: {message}"))
    } else {
        StoreError::Query(format!("{op}: {message}"))
    }
}

fn row_to_user(row: &libsql::Row) -> Result<User, StoreError> {
    let id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("user row: {e}")))?;
    let phone_number: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("user row: {e}")))?;
    let name: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("user row: {e}")))?;
    let persona: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("user row: {e}")))?;
    let created_at: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("user row: {e}")))?;

    Ok(User {
        id: parse_uuid(&id),
        phone_number,
        name,
        persona,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_active(row: &libsql::Row) -> Result<ActiveConversation, StoreError> {
    let user_id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("active row: {e}")))?;
    let interview: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("active row: {e}")))?;
    let feedback: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("active row: {e}")))?;
    let created_at: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("active row: {e}")))?;
    let updated_at: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("active row: {e}")))?;

    Ok(ActiveConversation {
        user_id: parse_uuid(&user_id),
        interview: transcript_from_json(&interview)?,
        feedback: transcript_from_json(&feedback)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_previous(row: &libsql::Row) -> Result<PreviousConversation, StoreError> {
    let id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("previous row: {e}")))?;
    let user_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("previous row: {e}")))?;
    let interview: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("previous row: {e}")))?;
    let feedback: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("previous row: {e}")))?;
    let created_at: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("previous row: {e}")))?;

    Ok(PreviousConversation {
        id: parse_uuid(&id),
        user_id: parse_uuid(&user_id),
        interview: transcript_from_json(&interview)?,
        feedback: transcript_from_json(&feedback)?,
        created_at: parse_datetime(&created_at),
    })
}

#[async_trait]
impl ConversationStore for LibSqlStore {
    async fn create_user(
        &self,
        phone_number: &str,
        name: &str,
        persona: &str,
    ) -> Result<User, StoreError> {
        let user = User::new(phone_number, name, persona);
        self.conn
            .execute(
                "INSERT INTO users (id, phone_number, name, persona, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.phone_number.clone(),
                    user.name.clone(),
                    user.persona.clone(),
                    user.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_insert_err("create_user", e))?;

        debug!(user_id = %user.id, "User inserted into DB");
        Ok(user)
    }

    async fn get_user_by_phone(&self, phone_number: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?1"),
                params![phone_number],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_user_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_user_by_phone: {e}"))),
        }
    }

    async fn get_active(&self, user_id: Uuid) -> Result<Option<ActiveConversation>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ACTIVE_COLUMNS} FROM active_conversations WHERE user_id = ?1"),
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_active: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_active(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_active: {e}"))),
        }
    }

    async fn save_active(&self, conversation: &ActiveConversation) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO active_conversations (user_id, interview, feedback, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     interview = excluded.interview,
                     feedback = excluded.feedback,
                     updated_at = excluded.updated_at",
                params![
                    conversation.user_id.to_string(),
                    transcript_to_json(&conversation.interview)?,
                    transcript_to_json(&conversation.feedback)?,
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("save_active: {e}")))?;

        debug!(user_id = %conversation.user_id, "Active conversation saved");
        Ok(())
    }

    async fn archive_active(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("archive_active begin: {e}")))?;

        let mut rows = tx
            .query(
                "SELECT interview, feedback FROM active_conversations WHERE user_id = ?1",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive_active select: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            // Nothing to archive; dropping the transaction writes nothing.
            Ok(None) => return Ok(false),
            Err(e) => return Err(StoreError::Query(format!("archive_active select: {e}"))),
        };

        let interview: String = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("archive_active row: {e}")))?;
        let feedback: String = row
            .get(1)
            .map_err(|e| StoreError::Query(format!("archive_active row: {e}")))?;

        tx.execute(
            "INSERT INTO previous_conversations (id, user_id, interview, feedback, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                interview,
                feedback,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("archive_active insert: {e}")))?;

        tx.execute(
            "DELETE FROM active_conversations WHERE user_id = ?1",
            params![user_id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("archive_active delete: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("archive_active commit: {e}")))?;

        debug!(user_id = %user_id, "Active conversation archived");
        Ok(true)
    }

    async fn remove_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("remove_user begin: {e}")))?;

        tx.execute(
            "DELETE FROM active_conversations WHERE user_id = ?1",
            params![user_id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("remove_user active delete: {e}")))?;

        tx.execute(
            "DELETE FROM users WHERE id = ?1",
            params![user_id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("remove_user user delete: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("remove_user commit: {e}")))?;

        debug!(user_id = %user_id, "User removed");
        Ok(())
    }

    async fn list_previous(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PreviousConversation>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PREVIOUS_COLUMNS} FROM previous_conversations
                     WHERE user_id = ?1 ORDER BY created_at DESC"
                ),
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_previous: {e}")))?;

        let mut conversations = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            conversations.push(row_to_previous(&row)?);
        }
        Ok(conversations)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
