//! Error types for scambait.

/// Top-level error type for the responder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox and transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Failed to send reply: {0}")]
    SendFailed(String),

    #[error("Invalid mail address: {0}")]
    InvalidAddress(String),
}

/// Model provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Completion request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid completion response: {reason}")]
    InvalidResponse { reason: String },
}

/// Reply session errors, keyed by the inbound email id they occurred on.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No message content in completion for email id '{email_id}'")]
    MissingContent { email_id: String },

    #[error("Failed to parse message content for email id '{email_id}'")]
    MalformedReply { email_id: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Result type alias for the responder.
pub type Result<T> = std::result::Result<T, Error>;
