//! User and conversation data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One paired exchange: the founder's message and the simulated customer's
/// reply.
///
/// Turns are constructed whole. There is no way to record a user turn
/// without the reply that answered it, which keeps the two sides of a
/// transcript equal length by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub bot: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
            at: Utc::now(),
        }
    }
}

/// An ordered sequence of paired turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append one paired exchange.
    pub fn push(&mut self, user: impl Into<String>, bot: impl Into<String>) {
        self.0.push(Turn::new(user, bot));
    }

    pub fn last(&self) -> Option<&Turn> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    /// Render the transcript as plain text for prompt embedding.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for turn in &self.0 {
            out.push_str("Founder: ");
            out.push_str(&turn.user);
            out.push('\n');
            out.push_str("Customer: ");
            out.push_str(&turn.bot);
            out.push('\n');
        }
        out
    }
}

/// A registered founder, keyed by WhatsApp phone number.
///
/// Immutable after registration; deleted only by the `remove` command,
/// which also drops the active conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub phone_number: String,
    pub name: String,
    /// Free-text description of the founder's target customer.
    pub persona: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        phone_number: impl Into<String>,
        name: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone_number: phone_number.into(),
            name: name.into(),
            persona: persona.into(),
            created_at: Utc::now(),
        }
    }
}

/// The single in-progress conversation for a user.
///
/// Created lazily on the first inbound message, mutated by appending
/// turns, and destroyed by `reset` (archived) or `remove` (dropped).
/// The `user_id` primary key in the store enforces at most one per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConversation {
    pub user_id: Uuid,
    pub interview: Transcript,
    pub feedback: Transcript,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActiveConversation {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            interview: Transcript::new(),
            feedback: Transcript::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the modification timestamp after appending a turn.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// An immutable archive snapshot, written when an active conversation is
/// reset. Never mutated or deleted afterwards; in particular `remove`
/// keeps a departed user's archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousConversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub interview: Transcript,
    pub feedback: Transcript,
    pub created_at: DateTime<Utc>,
}
