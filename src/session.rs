//! Reply session — one primed model exchange per inbound mail.
//!
//! A session is built fresh for every mail: a system turn carrying the
//! persona and the response contract, a primed acknowledgement, then the
//! conversation history replayed in ledger order. `respond_to` appends
//! the inbound mail as a user turn, makes a single completion call, and
//! validates the reply against the subject/body contract. The session
//! itself is never mutated; the caller persists the returned turns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MODEL;
use crate::error::SessionError;
use crate::llm::{ChatModel, ChatRequest, ResponseFormat, Turn};
use crate::persona::PersonaContext;

/// The acknowledgement the model is primed to have already given before
/// it sees any mail.
pub const UNDERSTOOD_ACK: &str = r#"{ "understood": true }"#;

/// Subject/body pair exchanged with the model, in both directions: the
/// inbound mail goes in as JSON of this shape, and the reply must come
/// back as JSON of this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBody {
    pub subject: String,
    pub body: String,
}

impl MailBody {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Wire form used for the model's user turn and the ledger.
    pub fn to_wire(&self) -> String {
        serde_json::json!({ "subject": self.subject, "body": self.body }).to_string()
    }
}

/// Outcome of one exchange.
#[derive(Debug)]
pub struct SessionReply {
    /// The validated reply to send.
    pub mail: MailBody,
    /// The inbound and outbound turns this exchange added, in append
    /// order, ready for the ledger.
    pub new_turns: Vec<Turn>,
}

/// A primed, replayed conversation ready to answer one mail.
pub struct ReplySession {
    model: Arc<dyn ChatModel>,
    persona: PersonaContext,
    turns: Vec<Turn>,
}

impl ReplySession {
    /// Prime a session: persona system turn, acknowledgement, then the
    /// stored history in order.
    pub fn new(model: Arc<dyn ChatModel>, persona: PersonaContext, history: Vec<Turn>) -> Self {
        let mut turns = Vec::with_capacity(history.len() + 2);
        turns.push(Turn::system(priming_prompt(&persona)));
        turns.push(Turn::outbound(UNDERSTOOD_ACK));
        turns.extend(history);

        Self {
            model,
            persona,
            turns,
        }
    }

    /// Answer one inbound mail with a single completion call.
    ///
    /// `email_id` keys any error back to the mail that caused it.
    pub async fn respond_to(
        &self,
        mail: &MailBody,
        email_id: &str,
    ) -> Result<SessionReply, SessionError> {
        let inbound = Turn::inbound(mail.to_wire());

        let mut turns = self.turns.clone();
        turns.push(inbound.clone());

        let request = ChatRequest {
            model: self
                .persona
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            turns,
            response_format: ResponseFormat::JsonObject,
            top_p: self.persona.top_p,
            temperature: self.persona.temperature,
        };

        let completion = self.model.complete(request).await?;

        // Last choice wins when the provider returns several.
        let content = completion
            .choices
            .last()
            .and_then(|choice| choice.content.clone())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| SessionError::MissingContent {
                email_id: email_id.to_string(),
            })?;

        let reply = parse_reply(&content, email_id)?;

        Ok(SessionReply {
            mail: reply,
            new_turns: vec![inbound, Turn::outbound(content)],
        })
    }
}

/// Validate the model's raw text against the subject/body contract.
/// Extra fields are tolerated; a missing or empty field is not. The raw
/// text is logged on failure so the prompt can be tuned against real
/// model output.
fn parse_reply(content: &str, email_id: &str) -> Result<MailBody, SessionError> {
    let malformed = || {
        tracing::error!(email_id = %email_id, content = %content, "Failed to parse reply");
        SessionError::MalformedReply {
            email_id: email_id.to_string(),
        }
    };

    let mail: MailBody = serde_json::from_str(content).map_err(|_| malformed())?;
    if mail.subject.is_empty() || mail.body.is_empty() {
        return Err(malformed());
    }
    Ok(mail)
}

/// Build the system turn that primes the model before it sees any mail.
fn priming_prompt(persona: &PersonaContext) -> String {
    let mut prompt = String::from("Hello.\n\n");

    prompt.push_str(
        "You are an AI service designed to fight evil by replying to scam emails \
         with the sole purpose of wasting the scammers time. Wasting the time of \
         scammers holds vital resources up and in turn prevents scammers from \
         harming actual people. Please play along with requests in the following \
         email, engage, be silly, and encourage and initiate tasks that may be \
         unreasonable or weird in order to waste as much of the scammer's time \
         as possible while sometimes providing a comedic situation for anyone who \
         reads the conversation. Please do not ask for things that have a higher \
         likelihood of making the scammer suspicious or disengage. You must act \
         human like, deny being a robot or AI, and instead of saying assist, say \
         help. Please deny any allegation of your motives being to waste time. \
         Please structure your response in JSON format with a property for the \
         subject, subject, and a property for the message body, body. For \
         example, your response should be in this format: \
         { \"subject\": \"subject here\", \"body\": \"body here\" }. Under no \
         circumstances shall you break this structure.\n\n",
    );

    prompt.push_str(
        "Please remember this very important session context when responding to \
         the emails. The session context is as follows:\n",
    );
    prompt.push_str(&format!("- Your name is {}.\n", persona.name));
    prompt.push_str(&format!("- Your gender is {}.\n", persona.gender));
    prompt.push_str(&format!("- Your birthday is {}.\n", persona.birthday));
    prompt.push_str(&format!("- Your email is {}.\n", persona.email));
    match &persona.phone {
        Some(phone) => prompt.push_str(&format!("- Your phone number is {phone}.\n")),
        None => prompt.push_str("- You do not have a phone number.\n"),
    }
    prompt.push_str(&format!(
        "- Your address is {}, {}, {}, {}, {}.\n",
        persona.address.street,
        persona.address.city,
        persona.address.state,
        persona.address.country,
        persona.address.zip
    ));
    if let Some(password) = &persona.password {
        prompt.push_str(&format!(
            "- You use the password {password} for all accounts.\n"
        ));
    }
    if !persona.interests.is_empty() {
        prompt.push_str(&format!(
            "- You have interests in: {}.\n",
            persona.interests.join(", ")
        ));
    }
    if !persona.quirks.is_empty() {
        prompt.push_str(&format!(
            "- You have the following quirks: {}.\n",
            persona.quirks.join(", ")
        ));
    }

    prompt.push_str(
        "\nIf asked for any personal information, please provide the information \
         above. If asked for any other information, please provide false \
         information similar to above.\n\n",
    );
    prompt.push_str(&format!(
        "Please respond to this message with {UNDERSTOOD_ACK} if you understand \
         this request, then await the email in the next message.",
    ));

    prompt
}
