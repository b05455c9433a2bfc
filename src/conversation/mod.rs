//! Conversation domain: users, transcripts, active and archived sessions.

pub mod model;

pub use model::{ActiveConversation, PreviousConversation, Transcript, Turn, User};
