//! Conversation resolution.
//!
//! An inbound mail names its ancestry in the References header. Walking
//! that chain oldest-first and keeping the first id we have on record
//! pins the mail to the conversation it grew out of, even when the
//! scammer's client mangles the newer end of the chain.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

/// Maps an inbound mail onto a conversation.
#[async_trait]
pub trait ThreadMatcher: Send + Sync {
    /// Resolve the conversation the mail belongs to, creating a fresh
    /// one owned by `persona_id` when nothing in the chain matches.
    async fn resolve(
        &self,
        store: &dyn Database,
        persona_id: Uuid,
        message_id: &str,
        references: &[String],
    ) -> Result<Uuid, DatabaseError>;
}

/// Chain walker: scans the reference chain in order and keeps the
/// first id that maps to a known mail. Each lookup also matches the
/// inbound mail's own id, so a re-fetched mail lands in its original
/// conversation even when its chain is empty of known ids.
pub struct FirstMatchWins;

#[async_trait]
impl ThreadMatcher for FirstMatchWins {
    async fn resolve(
        &self,
        store: &dyn Database,
        persona_id: Uuid,
        message_id: &str,
        references: &[String],
    ) -> Result<Uuid, DatabaseError> {
        for reference in references {
            if let Some(conversation_id) = store
                .find_conversation_by_reference(reference, message_id)
                .await?
            {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    reference = %reference,
                    "Matched existing conversation"
                );
                return Ok(conversation_id);
            }
        }

        store.create_conversation(persona_id).await
    }
}
