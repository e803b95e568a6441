//! Inbound mail — parsing raw RFC 822 messages into [`InboundEmail`].

pub mod imap;
pub mod smtp;

pub use imap::{ImapSource, MailSource};
pub use smtp::{MailSink, OutboundReply, SendReceipt, SmtpSink};

use mail_parser::{HeaderValue, MessageParser};
use uuid::Uuid;

/// A mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// One fetched inbound email, normalized for processing.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// Native message id without angle brackets. Generated when the
    /// message carries none, so the mail row can still be keyed.
    pub message_id: String,
    pub subject: String,
    pub body: String,
    pub from: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    /// Ancestor chain from the References header, oldest first,
    /// normalized to bare ids.
    pub references: Vec<String>,
}

impl InboundEmail {
    /// Parse a raw RFC 822 message.
    /// Returns `None` when the bytes are not a parseable message.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let message_id = parsed
            .message_id()
            .map(normalize_message_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        Some(Self {
            message_id,
            subject: parsed.subject().unwrap_or_default().to_string(),
            body: extract_text(&parsed),
            from: extract_mailboxes(parsed.from()),
            cc: extract_mailboxes(parsed.cc()),
            bcc: extract_mailboxes(parsed.bcc()),
            references: extract_references(&parsed),
        })
    }

    /// The address replies should go to, for logging.
    pub fn sender(&self) -> String {
        self.from
            .first()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Strip the angle brackets of an RFC 5322 message id token.
pub fn normalize_message_id(raw: &str) -> String {
    let s = raw.trim();
    if s.starts_with('<') && s.ends_with('>') && s.len() >= 2 {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// The References header may be absent, a single id, or a list.
/// Normalize all three shapes to a list of bare ids.
fn extract_references(parsed: &mail_parser::Message) -> Vec<String> {
    let Some(value) = parsed.header("References") else {
        return Vec::new();
    };
    let ids: Vec<String> = match value {
        HeaderValue::Text(id) => vec![normalize_message_id(id)],
        HeaderValue::TextList(ids) => ids.iter().map(|id| normalize_message_id(id)).collect(),
        _ => Vec::new(),
    };
    ids.into_iter().filter(|id| !id.is_empty()).collect()
}

/// Extract readable text from a parsed email: plain text part first,
/// then HTML stripped to text, else empty.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_mailboxes(addr: Option<&mail_parser::Address>) -> Vec<EmailAddress> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(to_mailbox).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(to_mailbox))
            .collect(),
    }
}

fn to_mailbox(addr: &mail_parser::Addr) -> Option<EmailAddress> {
    let address = addr.address.as_ref()?.to_string();
    Some(EmailAddress {
        name: addr.name.as_ref().map(|n| n.to_string()),
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_email() -> &'static [u8] {
        b"Message-ID: <origin@scam.example>\r\n\
          References: <rootid@scam.example> <mid@scam.example>\r\n\
          From: Prince Adaku <prince@scam.example>\r\n\
          To: gerald.briggs@example.com\r\n\
          Cc: Barrister Femi <femi@scam.example>\r\n\
          Subject: URGENT BUSINESS PROPOSAL\r\n\
          Content-Type: text/plain\r\n\
          \r\n\
          Dear friend, I have 10 million USD for you.\r\n"
    }

    #[test]
    fn parse_extracts_threading_fields() {
        let email = InboundEmail::parse(sample_email()).unwrap();

        assert_eq!(email.message_id, "origin@scam.example");
        assert_eq!(
            email.references,
            vec!["rootid@scam.example".to_string(), "mid@scam.example".to_string()]
        );
        assert_eq!(email.subject, "URGENT BUSINESS PROPOSAL");
        assert!(email.body.contains("10 million USD"));
    }

    #[test]
    fn parse_extracts_mailboxes_with_names() {
        let email = InboundEmail::parse(sample_email()).unwrap();

        assert_eq!(email.from.len(), 1);
        assert_eq!(email.from[0].name.as_deref(), Some("Prince Adaku"));
        assert_eq!(email.from[0].address, "prince@scam.example");
        assert_eq!(email.from[0].to_string(), "Prince Adaku <prince@scam.example>");

        assert_eq!(email.cc.len(), 1);
        assert_eq!(email.cc[0].address, "femi@scam.example");
        assert!(email.bcc.is_empty());
        assert_eq!(email.sender(), "Prince Adaku <prince@scam.example>");
    }

    #[test]
    fn parse_without_references_yields_empty_chain() {
        let raw = b"Message-ID: <solo@scam.example>\r\n\
                    From: a@scam.example\r\n\
                    Subject: hello\r\n\
                    \r\n\
                    body\r\n";
        let email = InboundEmail::parse(raw).unwrap();
        assert!(email.references.is_empty());
    }

    #[test]
    fn parse_single_reference_normalizes_to_list() {
        let raw = b"Message-ID: <reply@scam.example>\r\n\
                    References: <rootid@scam.example>\r\n\
                    From: a@scam.example\r\n\
                    Subject: re: hello\r\n\
                    \r\n\
                    body\r\n";
        let email = InboundEmail::parse(raw).unwrap();
        assert_eq!(email.references, vec!["rootid@scam.example".to_string()]);
    }

    #[test]
    fn parse_generates_id_when_message_id_missing() {
        let raw = b"From: a@scam.example\r\n\
                    Subject: no id\r\n\
                    \r\n\
                    body\r\n";
        let email = InboundEmail::parse(raw).unwrap();
        assert!(email.message_id.starts_with("gen-"));
    }

    #[test]
    fn parse_html_only_body_is_stripped() {
        let raw = b"Message-ID: <html@scam.example>\r\n\
                    From: a@scam.example\r\n\
                    Subject: html\r\n\
                    Content-Type: text/html\r\n\
                    \r\n\
                    <html><body><p>Claim your <b>prize</b> now</p></body></html>\r\n";
        let email = InboundEmail::parse(raw).unwrap();
        assert!(email.body.contains("Claim your"));
        assert!(!email.body.contains('<'));
    }

    #[test]
    fn normalize_strips_brackets_only_when_present() {
        assert_eq!(normalize_message_id("<abc@x>"), "abc@x");
        assert_eq!(normalize_message_id("abc@x"), "abc@x");
        assert_eq!(normalize_message_id("  <abc@x>  "), "abc@x");
        assert_eq!(normalize_message_id("<>"), "");
    }

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("no tags"), "no tags");
    }
}
