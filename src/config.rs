//! Environment-driven configuration.
//!
//! The responder has no CLI surface; every setting comes from the
//! environment at startup and every variable below is required unless
//! noted. A missing variable is a fatal [`ConfigError::MissingEnvVar`].

use std::time::Duration;

use secrecy::SecretString;
use uuid::Uuid;

use crate::error::ConfigError;

/// Interval between inbox polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(90);

/// Additional send delay applied per message within a single tick.
pub const STAGGER_INCREMENT: Duration = Duration::from_secs(10);

/// Model used when the persona row does not name one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ── Sections ────────────────────────────────────────────────────────

/// IMAP mailbox settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: SecretString,
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Sender identity stamped on every outbound reply.
#[derive(Debug, Clone)]
pub struct FromIdentity {
    pub name: String,
    pub address: String,
}

/// Full responder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<String>,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub database_path: String,
    pub from: FromIdentity,
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    /// Persona row the responder replies as.
    pub persona_id: Uuid,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap = ImapConfig {
            host: required_env("IMAP_SERVER")?,
            port: parse_u16("IMAP_PORT", required_env("IMAP_PORT")?)?,
            use_tls: parse_bool("IMAP_USE_TLS", required_env("IMAP_USE_TLS")?)?,
            username: required_env("IMAP_USERNAME")?,
            password: required_env("IMAP_PASSWORD")?.into(),
        };

        let smtp = SmtpConfig {
            host: required_env("SMTP_SERVER")?,
            port: parse_u16("SMTP_PORT", required_env("SMTP_PORT")?)?,
            username: required_env("SMTP_USERNAME")?,
            password: required_env("SMTP_PASSWORD")?.into(),
        };

        let from = FromIdentity {
            name: required_env("FROM_NAME")?,
            address: required_env("FROM_ADDRESS")?,
        };

        let persona_id = parse_uuid("PERSONA_ID", required_env("PERSONA_ID")?)?;

        Ok(Self {
            log_level: required_env("LOG_LEVEL")?,
            log_dir: std::env::var("LOG_DIR").ok(),
            imap,
            smtp,
            database_path: required_env("DATABASE_PATH")?,
            from,
            openai_api_key: required_env("OPENAI_API_KEY")?.into(),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            persona_id,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Read an environment variable or fail with the variable's name.
pub fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_u16(key: &str, value: String) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a port number, got '{value}'"),
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{other}'"),
        }),
    }
}

fn parse_uuid(key: &str, value: String) -> Result<Uuid, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a UUID, got '{value}'"),
    })
}
