//! SMTP mail sink — sends persona replies back into the scammer's thread.
//!
//! Outbound mail reuses the inbound reference chain so the reply lands
//! in the same conversation in the scammer's client. Each reply gets an
//! explicit Message-ID under the sender's domain; that id is what later
//! inbound mail will carry in its own References header.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::{FromIdentity, SmtpConfig};
use crate::error::MailError;
use crate::mail::{EmailAddress, InboundEmail};

/// A reply ready to send, addressed back at the inbound mail's senders.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub body: String,
    /// Bare message ids, oldest first.
    pub references: Vec<String>,
}

impl OutboundReply {
    /// Address a reply at the mail it answers, carrying its reference
    /// chain. A first contact has no chain, so the reply threads on the
    /// inbound message id itself.
    pub fn to_inbound(email: &InboundEmail, subject: String, body: String) -> Self {
        let references = if email.references.is_empty() {
            vec![email.message_id.clone()]
        } else {
            email.references.clone()
        };

        Self {
            to: email.from.clone(),
            cc: email.cc.clone(),
            bcc: email.bcc.clone(),
            subject,
            body,
            references,
        }
    }

    /// References header value: every chain id re-bracketed, space-joined.
    pub fn references_header(&self) -> String {
        self.references
            .iter()
            .map(|id| format!("<{id}>"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// In-Reply-To header value: the first id in the chain.
    pub fn in_reply_to_header(&self) -> Option<String> {
        self.references.first().map(|id| format!("<{id}>"))
    }
}

/// Proof of a completed send: the Message-ID the reply went out under.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Where outbound mail goes.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, reply: &OutboundReply) -> Result<SendReceipt, MailError>;
}

/// SMTP-backed sink.
pub struct SmtpSink {
    config: SmtpConfig,
    from: FromIdentity,
}

impl SmtpSink {
    pub fn new(config: SmtpConfig, from: FromIdentity) -> Self {
        Self { config, from }
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        Ok(SmtpTransport::relay(&self.config.host)
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build())
    }

    fn from_mailbox(&self) -> Result<Mailbox, MailError> {
        let address = self
            .from
            .address
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("'{}': {e}", self.from.address)))?;
        Ok(Mailbox::new(Some(self.from.name.clone()), address))
    }

    fn build_message(&self, reply: &OutboundReply, message_id: &str) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.from_mailbox()?)
            .subject(reply.subject.clone())
            .message_id(Some(format!("<{message_id}>")));

        for to in &reply.to {
            builder = builder.to(to_mailbox(to)?);
        }
        for cc in &reply.cc {
            builder = builder.cc(to_mailbox(cc)?);
        }
        for bcc in &reply.bcc {
            builder = builder.bcc(to_mailbox(bcc)?);
        }

        if let Some(header) = reply.in_reply_to_header() {
            builder = builder.in_reply_to(header);
        }
        let references = reply.references_header();
        if !references.is_empty() {
            builder = builder.references(references);
        }

        builder
            .body(reply.body.clone())
            .map_err(|e| MailError::SendFailed(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl MailSink for SmtpSink {
    async fn send(&self, reply: &OutboundReply) -> Result<SendReceipt, MailError> {
        let message_id = generate_message_id(&self.from.address);
        let message = self.build_message(reply, &message_id)?;
        let transport = self.transport()?;

        // lettre's SMTP transport is blocking.
        tokio::task::spawn_blocking(move || {
            transport
                .send(&message)
                .map(|_| ())
                .map_err(|e| MailError::SendFailed(format!("SMTP send failed: {e}")))
        })
        .await
        .map_err(|e| MailError::SendFailed(format!("send task panicked: {e}")))??;

        tracing::info!(message_id = %message_id, "Email sent");
        Ok(SendReceipt { message_id })
    }
}

fn to_mailbox(addr: &EmailAddress) -> Result<Mailbox, MailError> {
    let address = addr
        .address
        .parse()
        .map_err(|e| MailError::InvalidAddress(format!("'{}': {e}", addr.address)))?;
    Ok(Mailbox::new(addr.name.clone(), address))
}

/// Fresh bare Message-ID under the sender's domain.
fn generate_message_id(from_address: &str) -> String {
    let domain = from_address
        .split_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or("localhost");
    format!("{}@{}", Uuid::new_v4(), domain)
}
