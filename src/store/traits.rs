//! Backend-agnostic persistence trait for users and conversations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::conversation::{ActiveConversation, PreviousConversation, User};
use crate::error::StoreError;

/// Single async interface for all persistence: the user directory, the
/// active conversation per user, and the archive of previous sessions.
///
/// Every method is one atomic unit. Multi-row operations
/// (`archive_active`, `remove_user`) run in a transaction; a partial
/// write — an archive row without the active delete, or a dangling
/// active conversation after a user delete — must be impossible.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ── Users ───────────────────────────────────────────────────────

    /// Insert a new user. A duplicate phone number fails with
    /// [`StoreError::Constraint`] and leaves no partial row behind.
    async fn create_user(
        &self,
        phone_number: &str,
        name: &str,
        persona: &str,
    ) -> Result<User, StoreError>;

    /// Look up a user by exact phone number.
    async fn get_user_by_phone(&self, phone_number: &str) -> Result<Option<User>, StoreError>;

    // ── Active conversations ────────────────────────────────────────

    /// Get the user's active conversation, if one is persisted.
    async fn get_active(&self, user_id: Uuid) -> Result<Option<ActiveConversation>, StoreError>;

    /// Insert-or-replace the active conversation in one statement.
    async fn save_active(&self, conversation: &ActiveConversation) -> Result<(), StoreError>;

    /// Snapshot the active conversation into the archive and delete it,
    /// atomically. Returns `false` (writing nothing) when no active row
    /// exists — a lazily created, never-persisted conversation composes
    /// with `reset` into a persisted no-op.
    async fn archive_active(&self, user_id: Uuid) -> Result<bool, StoreError>;

    /// Delete the user and their active conversation atomically.
    /// Archived conversations are retained.
    async fn remove_user(&self, user_id: Uuid) -> Result<(), StoreError>;

    // ── Archive ─────────────────────────────────────────────────────

    /// List a user's archived conversations, newest first.
    async fn list_previous(&self, user_id: Uuid)
        -> Result<Vec<PreviousConversation>, StoreError>;
}
