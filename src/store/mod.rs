//! Persistence layer — conversations, mails, the message ledger, personas.

pub mod libsql;
pub mod migrations;

pub use libsql::LibSqlBackend;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::llm::{Role, Turn};
use crate::persona::PersonaContext;

/// A mail row: one inbound email the responder has seen.
#[derive(Debug, Clone)]
pub struct MailRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Native RFC 5322 message id, stored without angle brackets.
    pub email_message_id: String,
    /// Ledger entry id of the reply persisted for this mail. NULL until a
    /// reply has been sent and stored; a NULL mail is retried next tick.
    pub replied_message_id: Option<Uuid>,
}

impl MailRecord {
    /// Whether a reply for this mail has been sent and persisted.
    pub fn is_processed(&self) -> bool {
        self.replied_message_id.is_some()
    }
}

/// One persisted conversation turn.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
}

impl LedgerEntry {
    pub fn into_turn(self) -> Turn {
        Turn {
            role: self.role,
            content: self.content,
        }
    }
}

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Create a new conversation owned by the given persona.
    /// Returns the generated conversation id.
    async fn create_conversation(&self, persona_id: Uuid) -> Result<Uuid, DatabaseError>;

    /// Find the conversation of any mail whose native message id equals
    /// either `reference` or `own_message_id`.
    async fn find_conversation_by_reference(
        &self,
        reference: &str,
        own_message_id: &str,
    ) -> Result<Option<Uuid>, DatabaseError>;

    // ── Mails ───────────────────────────────────────────────────────

    /// Look up a mail by its native message id.
    async fn find_mail_by_message_id(
        &self,
        email_message_id: &str,
    ) -> Result<Option<MailRecord>, DatabaseError>;

    /// Get the mail row for `email_message_id`, creating one bound to
    /// `conversation_id` if none exists. Idempotent: concurrent callers
    /// converge on a single row.
    async fn locate_or_create_mail(
        &self,
        conversation_id: Uuid,
        email_message_id: &str,
    ) -> Result<MailRecord, DatabaseError>;

    /// Record the ledger entry id of the reply stored for this mail,
    /// marking the mail processed.
    async fn mark_mail_replied(&self, mail_id: Uuid, entry_id: Uuid) -> Result<(), DatabaseError>;

    // ── Ledger ──────────────────────────────────────────────────────

    /// All turns of a conversation, in insertion order.
    async fn history(&self, conversation_id: Uuid) -> Result<Vec<LedgerEntry>, DatabaseError>;

    /// Append turns to a conversation, preserving order.
    /// Returns the persisted entries.
    async fn append_turns(
        &self,
        conversation_id: Uuid,
        turns: &[Turn],
    ) -> Result<Vec<LedgerEntry>, DatabaseError>;

    // ── Personas ────────────────────────────────────────────────────

    /// Fetch a persona. A missing row is a `NotFound` error, never a skip.
    async fn persona(&self, persona_id: Uuid) -> Result<PersonaContext, DatabaseError>;

    /// Insert a persona row.
    async fn insert_persona(
        &self,
        persona_id: Uuid,
        persona: &PersonaContext,
    ) -> Result<(), DatabaseError>;
}
