//! Mail dispatch — answers one inbound mail end to end.
//!
//! Conversation resolution, history replay, and the completion call run
//! inline; the send itself happens on a spawned task after the caller's
//! stagger delay so one poll tick's replies do not leave in a burst.
//! Ledger writes wait for the send: a failed send persists nothing, and
//! the mail is picked up again on a later tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, trace};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::{ChatModel, Turn};
use crate::mail::{InboundEmail, MailSink, OutboundReply};
use crate::session::{MailBody, ReplySession};
use crate::store::Database;
use crate::thread::ThreadMatcher;

pub struct Dispatcher {
    store: Arc<dyn Database>,
    model: Arc<dyn ChatModel>,
    sink: Arc<dyn MailSink>,
    matcher: Arc<dyn ThreadMatcher>,
    persona_id: Uuid,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Database>,
        model: Arc<dyn ChatModel>,
        sink: Arc<dyn MailSink>,
        matcher: Arc<dyn ThreadMatcher>,
        persona_id: Uuid,
    ) -> Self {
        Self {
            store,
            model,
            sink,
            matcher,
            persona_id,
        }
    }

    /// Generate a reply to one inbound mail and schedule its send after
    /// `stagger`. Returns the send task's handle.
    pub async fn handle_email(
        &self,
        email: InboundEmail,
        stagger: Duration,
    ) -> Result<JoinHandle<()>> {
        info!(
            email_id = %email.message_id,
            subject = %email.subject,
            body = %email.body,
            from = %email.sender(),
            "Received email"
        );

        let conversation_id = self
            .matcher
            .resolve(
                self.store.as_ref(),
                self.persona_id,
                &email.message_id,
                &email.references,
            )
            .await?;

        let mail = self
            .store
            .locate_or_create_mail(conversation_id, &email.message_id)
            .await?;

        let history = self.store.history(conversation_id).await?;
        let persona = self.store.persona(self.persona_id).await?;

        trace!(
            conversation_id = %conversation_id,
            mail_id = %mail.id,
            history_len = history.len(),
            "Email data"
        );

        let turns = history.into_iter().map(|entry| entry.into_turn()).collect();
        let session = ReplySession::new(Arc::clone(&self.model), persona, turns);

        let inbound = MailBody::new(email.subject.clone(), email.body.clone());
        let reply = session.respond_to(&inbound, &email.message_id).await?;

        let outbound = OutboundReply::to_inbound(&email, reply.mail.subject, reply.mail.body);

        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let new_turns = reply.new_turns;
        let email_id = email.message_id;
        let mail_id = mail.id;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(stagger).await;

            match sink.send(&outbound).await {
                Ok(receipt) => {
                    info!(
                        message_id = %receipt.message_id,
                        email_id = %email_id,
                        subject = %outbound.subject,
                        body = %outbound.body,
                        to = %recipients(&outbound),
                        "Sent email"
                    );

                    persist_exchange(
                        store.as_ref(),
                        conversation_id,
                        mail_id,
                        &new_turns,
                        &email_id,
                        &receipt.message_id,
                    )
                    .await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        email_id = %email_id,
                        subject = %outbound.subject,
                        body = %outbound.body,
                        to = %recipients(&outbound),
                        "Error sending email"
                    );
                }
            }
        });

        Ok(handle)
    }
}

/// Write the exchange to the ledger and flip the mail's processed
/// marker to the last stored entry. Runs on the send task, so failures
/// can only be logged; the mail stays unmarked and is retried next tick.
async fn persist_exchange(
    store: &dyn Database,
    conversation_id: Uuid,
    mail_id: Uuid,
    new_turns: &[Turn],
    email_id: &str,
    sent_message_id: &str,
) {
    let entries = match store.append_turns(conversation_id, new_turns).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(
                error = %e,
                email_id = %email_id,
                sent_message_id = %sent_message_id,
                "Failed to persist reply turns"
            );
            return;
        }
    };

    if let Some(last) = entries.last() {
        if let Err(e) = store.mark_mail_replied(mail_id, last.id).await {
            error!(
                error = %e,
                email_id = %email_id,
                sent_message_id = %sent_message_id,
                "Failed to mark mail as replied"
            );
        }
    }
}

fn recipients(reply: &OutboundReply) -> String {
    reply
        .to
        .iter()
        .map(|address| address.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
