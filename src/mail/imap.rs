//! IMAP mail source — fetches unanswered messages from the inbox.
//!
//! Raw IMAP over TLS (or plain TCP when disabled). The responder never
//! mutates mailbox flags: already-answered mail is excluded by the
//! `SEARCH UNANSWERED` criterion and everything else is deduplicated
//! against the database.

use std::io::{Read, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::ImapConfig;
use crate::error::MailError;
use crate::mail::InboundEmail;

/// Where inbound mail comes from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch all unanswered messages currently in the inbox.
    async fn fetch_unanswered(&self) -> Result<Vec<InboundEmail>, MailError>;
}

/// IMAP-backed source. Opens a fresh connection per fetch.
pub struct ImapSource {
    config: ImapConfig,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapSource {
    async fn fetch_unanswered(&self) -> Result<Vec<InboundEmail>, MailError> {
        let config = self.config.clone();
        // Blocking socket I/O — run off the async executor.
        tokio::task::spawn_blocking(move || {
            fetch_unanswered_imap(&config).map_err(|e| MailError::Imap(e.to_string()))
        })
        .await
        .map_err(|e| MailError::Imap(format!("fetch task panicked: {e}")))?
    }
}

// ── Blocking IMAP client ────────────────────────────────────────────

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

/// TLS or plaintext connection to the IMAP server.
enum ImapStream {
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
    Plain(TcpStream),
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Plain(stream) => stream.read(buf),
        }
    }
}

impl IoWrite for ImapStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Plain(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Plain(stream) => stream.flush(),
        }
    }
}

fn connect(config: &ImapConfig) -> Result<ImapStream, ImapError> {
    let tcp = TcpStream::connect((&*config.host, config.port))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    if !config.use_tls {
        return Ok(ImapStream::Plain(tcp));
    }

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    Ok(ImapStream::Tls(Box::new(rustls::StreamOwned::new(
        conn, tcp,
    ))))
}

/// Fetch unanswered emails via raw IMAP (blocking — run in spawn_blocking).
fn fetch_unanswered_imap(config: &ImapConfig) -> Result<Vec<InboundEmail>, ImapError> {
    let mut stream = connect(config)?;

    // ── IMAP helpers ────────────────────────────────────────────────
    let read_line = |stream: &mut ImapStream| -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match stream.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let send_cmd =
        |stream: &mut ImapStream, tag: &str, cmd: &str| -> Result<Vec<String>, ImapError> {
            let full = format!("{tag} {cmd}\r\n");
            stream.write_all(full.as_bytes())?;
            stream.flush()?;
            let mut lines = Vec::new();
            loop {
                let line = read_line(stream)?;
                let done = line.starts_with(tag);
                lines.push(line);
                if done {
                    break;
                }
            }
            Ok(lines)
        };

    // Read greeting
    let _greeting = read_line(&mut stream)?;

    // Login
    let login_resp = send_cmd(
        &mut stream,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err("IMAP login failed".into());
    }

    // Select INBOX
    let _select = send_cmd(&mut stream, "A2", "SELECT \"INBOX\"")?;

    // Search for mail nobody has answered yet
    let search_resp = send_cmd(&mut stream, "A3", "SEARCH UNANSWERED")?;
    let ids = parse_search_response(&search_resp);

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for id in &ids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut stream, &fetch_tag, &format!("FETCH {id} RFC822"))?;

        let raw = assemble_fetch_body(&fetch_resp);
        if let Some(email) = InboundEmail::parse(raw.as_bytes()) {
            results.push(email);
        } else {
            tracing::warn!(imap_id = %id, "Skipping unparseable message");
        }
    }

    // Logout
    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut stream, &logout_tag, "LOGOUT");

    Ok(results)
}

/// Pull message sequence ids out of a `* SEARCH ...` response.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                ids.extend(parts[2..].iter().map(|s| s.to_string()));
            }
        }
    }
    ids
}

/// Reassemble the message body from a FETCH response: drop the untagged
/// FETCH line and the tagged completion line, keep the literal in between.
fn assemble_fetch_body(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(2))
        .cloned()
        .collect()
}
