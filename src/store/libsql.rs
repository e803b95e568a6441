//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::llm::{Role, Turn};
use crate::persona::{PersonaContext, PostalAddress, join_list, split_list};
use crate::store::migrations;
use crate::store::{Database, LedgerEntry, MailRecord};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Open(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn parse_id(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("Invalid id '{s}': {e}")))
}

/// Read a required text column.
fn text(row: &libsql::Row, idx: i32, table: &str) -> Result<String, DatabaseError> {
    row.get(idx)
        .map_err(|e| DatabaseError::Query(format!("{table}: column {idx}: {e}")))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(f64::from(v)),
        None => libsql::Value::Null,
    }
}

fn row_to_mail(row: &libsql::Row) -> Result<MailRecord, DatabaseError> {
    let id: String = text(row, 0, "mails")?;
    let conversation_id: String = text(row, 1, "mails")?;
    let email_message_id: String = text(row, 2, "mails")?;
    let replied: Option<String> = row.get(3).ok();

    Ok(MailRecord {
        id: parse_id(&id)?,
        conversation_id: parse_id(&conversation_id)?,
        email_message_id,
        replied_message_id: replied.as_deref().map(parse_id).transpose()?,
    })
}

fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry, DatabaseError> {
    let id: String = text(row, 0, "messages")?;
    let conversation_id: String = text(row, 1, "messages")?;
    let role_str: String = text(row, 2, "messages")?;

    // An unknown role would corrupt session replay, so it is an error here
    // rather than a silent skip.
    let role: Role = role_str.parse().map_err(DatabaseError::Serialization)?;

    Ok(LedgerEntry {
        id: parse_id(&id)?,
        conversation_id: parse_id(&conversation_id)?,
        role,
        content: text(row, 3, "messages")?,
    })
}

fn row_to_persona(row: &libsql::Row) -> Result<PersonaContext, DatabaseError> {
    let birthday_str: String = text(row, 3, "personas")?;
    let birthday = birthday_str.parse().map_err(|e| {
        DatabaseError::Serialization(format!("Invalid birthday '{birthday_str}': {e}"))
    })?;

    let interests: Option<String> = row.get(12).ok();
    let quirks: Option<String> = row.get(13).ok();
    let top_p: Option<f64> = row.get(14).ok();
    let temperature: Option<f64> = row.get(15).ok();

    Ok(PersonaContext {
        name: text(row, 1, "personas")?,
        gender: text(row, 2, "personas")?,
        birthday,
        email: text(row, 4, "personas")?,
        phone: row.get(5).ok(),
        address: PostalAddress {
            street: text(row, 6, "personas")?,
            city: text(row, 7, "personas")?,
            state: text(row, 8, "personas")?,
            country: text(row, 9, "personas")?,
            zip: text(row, 10, "personas")?,
        },
        password: row.get(11).ok(),
        interests: split_list(interests),
        quirks: split_list(quirks),
        top_p: top_p.map(|v| v as f32),
        temperature: temperature.map(|v| v as f32),
        model: row.get(16).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MAIL_COLUMNS: &str = "id, conversation_id, email_message_id, replied_message_id";

const ENTRY_COLUMNS: &str = "id, conversation_id, role, content";

const PERSONA_COLUMNS: &str = "id, name, gender, birthday, email, phone, address_street, \
     address_city, address_state, address_country, address_zip, password, interests, quirks, \
     top_p, temperature, model";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(&self, persona_id: Uuid) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO conversations (id, persona_id) VALUES (?1, ?2)",
                params![id.to_string(), persona_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_conversation: {e}")))?;

        debug!(conversation_id = %id, "Conversation created");
        Ok(id)
    }

    async fn find_conversation_by_reference(
        &self,
        reference: &str,
        own_message_id: &str,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT conversation_id FROM mails \
                 WHERE email_message_id = ?1 OR email_message_id = ?2 LIMIT 1",
                params![reference, own_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation_by_reference: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = text(&row, 0, "mails")?;
                Ok(Some(parse_id(&id)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "find_conversation_by_reference: {e}"
            ))),
        }
    }

    // ── Mails ───────────────────────────────────────────────────────

    async fn find_mail_by_message_id(
        &self,
        email_message_id: &str,
    ) -> Result<Option<MailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAIL_COLUMNS} FROM mails WHERE email_message_id = ?1"),
                params![email_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_mail_by_message_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_mail(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_mail_by_message_id: {e}"))),
        }
    }

    async fn locate_or_create_mail(
        &self,
        conversation_id: Uuid,
        email_message_id: &str,
    ) -> Result<MailRecord, DatabaseError> {
        // The UNIQUE constraint on email_message_id makes this idempotent:
        // a lost race turns into an ignored insert and the re-read below
        // returns the winner's row.
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO mails (id, conversation_id, email_message_id) \
                 VALUES (?1, ?2, ?3)",
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    email_message_id
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("locate_or_create_mail: {e}")))?;

        if inserted > 0 {
            debug!(email_message_id, conversation_id = %conversation_id, "Mail row created");
        }

        match self.find_mail_by_message_id(email_message_id).await? {
            Some(mail) => Ok(mail),
            None => Err(DatabaseError::Query(format!(
                "locate_or_create_mail: row missing after insert for '{email_message_id}'"
            ))),
        }
    }

    async fn mark_mail_replied(&self, mail_id: Uuid, entry_id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE mails SET replied_message_id = ?1 WHERE id = ?2",
                params![entry_id.to_string(), mail_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_mail_replied: {e}")))?;

        debug!(mail_id = %mail_id, entry_id = %entry_id, "Mail marked replied");
        Ok(())
    }

    // ── Ledger ──────────────────────────────────────────────────────

    async fn history(&self, conversation_id: Uuid) -> Result<Vec<LedgerEntry>, DatabaseError> {
        // rowid preserves insertion order; created_at alone can tie within
        // one second.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM messages \
                     WHERE conversation_id = ?1 ORDER BY rowid ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("history: {e}")))?
        {
            entries.push(row_to_entry(&row)?);
        }
        Ok(entries)
    }

    async fn append_turns(
        &self,
        conversation_id: Uuid,
        turns: &[Turn],
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let mut entries = Vec::with_capacity(turns.len());
        for turn in turns {
            let id = Uuid::new_v4();
            self.conn()
                .execute(
                    "INSERT INTO messages (id, conversation_id, role, content) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        id.to_string(),
                        conversation_id.to_string(),
                        turn.role.as_str(),
                        turn.content.as_str()
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("append_turns: {e}")))?;

            entries.push(LedgerEntry {
                id,
                conversation_id,
                role: turn.role,
                content: turn.content.clone(),
            });
        }

        debug!(conversation_id = %conversation_id, count = entries.len(), "Ledger turns appended");
        Ok(entries)
    }

    // ── Personas ────────────────────────────────────────────────────

    async fn persona(&self, persona_id: Uuid) -> Result<PersonaContext, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PERSONA_COLUMNS} FROM personas WHERE id = ?1"),
                params![persona_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("persona: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_persona(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "persona".to_string(),
                id: persona_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("persona: {e}"))),
        }
    }

    async fn insert_persona(
        &self,
        persona_id: Uuid,
        persona: &PersonaContext,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO personas ({PERSONA_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    persona_id.to_string(),
                    persona.name.as_str(),
                    persona.gender.as_str(),
                    persona.birthday.to_string(),
                    persona.email.as_str(),
                    opt_text(persona.phone.as_deref()),
                    persona.address.street.as_str(),
                    persona.address.city.as_str(),
                    persona.address.state.as_str(),
                    persona.address.country.as_str(),
                    persona.address.zip.as_str(),
                    opt_text(persona.password.as_deref()),
                    opt_text_owned(join_list(&persona.interests)),
                    opt_text_owned(join_list(&persona.quirks)),
                    opt_real(persona.top_p),
                    opt_real(persona.temperature),
                    opt_text(persona.model.as_deref())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_persona: {e}")))?;

        debug!(persona_id = %persona_id, name = %persona.name, "Persona inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_persona() -> PersonaContext {
        PersonaContext {
            name: "Gerald Briggs".to_string(),
            gender: "male".to_string(),
            birthday: NaiveDate::from_ymd_opt(1951, 3, 14).unwrap(),
            email: "gerald.briggs@example.com".to_string(),
            phone: Some("+1 555 0147".to_string()),
            address: PostalAddress {
                street: "12 Elderberry Lane".to_string(),
                city: "Duluth".to_string(),
                state: "MN".to_string(),
                country: "USA".to_string(),
                zip: "55802".to_string(),
            },
            password: Some("hunter2".to_string()),
            interests: vec!["model trains".to_string(), "bird watching".to_string()],
            quirks: vec!["types in all caps when excited".to_string()],
            top_p: Some(1.0),
            temperature: Some(0.9),
            model: None,
        }
    }

    #[tokio::test]
    async fn locate_or_create_mail_is_idempotent() {
        let db = test_db().await;
        let persona_id = Uuid::new_v4();
        let conversation = db.create_conversation(persona_id).await.unwrap();

        let first = db
            .locate_or_create_mail(conversation, "abc@scam.example")
            .await
            .unwrap();
        let second = db
            .locate_or_create_mail(conversation, "abc@scam.example")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.conversation_id, conversation);
        assert!(!first.is_processed());

        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM mails", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn locate_or_create_mail_keeps_original_conversation() {
        let db = test_db().await;
        let persona_id = Uuid::new_v4();
        let original = db.create_conversation(persona_id).await.unwrap();
        let other = db.create_conversation(persona_id).await.unwrap();

        let first = db
            .locate_or_create_mail(original, "dup@scam.example")
            .await
            .unwrap();
        // A later call with a different conversation must not rebind the row.
        let second = db
            .locate_or_create_mail(other, "dup@scam.example")
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.conversation_id, original);
    }

    #[tokio::test]
    async fn find_mail_not_found() {
        let db = test_db().await;
        let result = db.find_mail_by_message_id("missing@scam.example").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn local_database_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("scambait.db");

        let conversation = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();
            db.locate_or_create_mail(conversation, "abc@scam.example")
                .await
                .unwrap();
            conversation
        };
        assert!(path.exists());

        // Reopen: migrations run again harmlessly and the rows are intact.
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let mail = db
            .find_mail_by_message_id("abc@scam.example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mail.conversation_id, conversation);
    }

    #[tokio::test]
    async fn mark_mail_replied_flips_processed() {
        let db = test_db().await;
        let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();
        let mail = db
            .locate_or_create_mail(conversation, "abc@scam.example")
            .await
            .unwrap();
        assert!(!mail.is_processed());

        let entry_id = Uuid::new_v4();
        db.mark_mail_replied(mail.id, entry_id).await.unwrap();

        let fetched = db
            .find_mail_by_message_id("abc@scam.example")
            .await
            .unwrap()
            .unwrap();
        assert!(fetched.is_processed());
        assert_eq!(fetched.replied_message_id, Some(entry_id));
    }

    #[tokio::test]
    async fn find_conversation_by_reference_matches_either_id() {
        let db = test_db().await;
        let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();
        db.locate_or_create_mail(conversation, "root@scam.example")
            .await
            .unwrap();

        // Match on the reference itself.
        let by_reference = db
            .find_conversation_by_reference("root@scam.example", "new@scam.example")
            .await
            .unwrap();
        assert_eq!(by_reference, Some(conversation));

        // Match on the inbound message's own id.
        let by_own_id = db
            .find_conversation_by_reference("unknown@scam.example", "root@scam.example")
            .await
            .unwrap();
        assert_eq!(by_own_id, Some(conversation));

        // No match at all.
        let none = db
            .find_conversation_by_reference("unknown@scam.example", "other@scam.example")
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn history_preserves_insertion_order() {
        let db = test_db().await;
        let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();
        let other = db.create_conversation(Uuid::new_v4()).await.unwrap();

        db.append_turns(
            conversation,
            &[Turn::inbound("first"), Turn::outbound("second")],
        )
        .await
        .unwrap();
        // Interleave another conversation's turns.
        db.append_turns(other, &[Turn::inbound("noise")]).await.unwrap();
        db.append_turns(conversation, &[Turn::inbound("third")])
            .await
            .unwrap();

        let history = db.history(conversation).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(history[0].role, Role::Inbound);
        assert_eq!(history[1].role, Role::Outbound);
        assert!(history.iter().all(|e| e.conversation_id == conversation));
    }

    #[tokio::test]
    async fn append_turns_returns_persisted_entries() {
        let db = test_db().await;
        let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();

        let entries = db
            .append_turns(
                conversation,
                &[Turn::inbound("in"), Turn::outbound("out")],
            )
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::Inbound);
        assert_eq!(entries[1].role, Role::Outbound);
        assert_ne!(entries[0].id, entries[1].id);

        let history = db.history(conversation).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, entries[1].id);
    }

    #[tokio::test]
    async fn unknown_role_is_a_serialization_error() {
        let db = test_db().await;
        let conversation = db.create_conversation(Uuid::new_v4()).await.unwrap();

        db.conn()
            .execute(
                "INSERT INTO messages (id, conversation_id, role, content) \
                 VALUES (?1, ?2, 'assistant', 'x')",
                params![Uuid::new_v4().to_string(), conversation.to_string()],
            )
            .await
            .unwrap();

        let err = db.history(conversation).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)));
    }

    #[tokio::test]
    async fn persona_round_trip() {
        let db = test_db().await;
        let persona_id = Uuid::new_v4();
        let persona = make_persona();

        db.insert_persona(persona_id, &persona).await.unwrap();
        let fetched = db.persona(persona_id).await.unwrap();

        assert_eq!(fetched.name, persona.name);
        assert_eq!(fetched.birthday, persona.birthday);
        assert_eq!(fetched.phone, persona.phone);
        assert_eq!(fetched.address.zip, persona.address.zip);
        assert_eq!(fetched.password, persona.password);
        assert_eq!(fetched.interests, persona.interests);
        assert_eq!(fetched.quirks, persona.quirks);
        assert_eq!(fetched.top_p, Some(1.0));
        assert_eq!(fetched.model, None);
    }

    #[tokio::test]
    async fn persona_without_optionals() {
        let db = test_db().await;
        let persona_id = Uuid::new_v4();
        let persona = PersonaContext {
            phone: None,
            password: None,
            interests: Vec::new(),
            quirks: Vec::new(),
            top_p: None,
            temperature: None,
            model: Some("gpt-4o-mini".to_string()),
            ..make_persona()
        };

        db.insert_persona(persona_id, &persona).await.unwrap();
        let fetched = db.persona(persona_id).await.unwrap();

        assert_eq!(fetched.phone, None);
        assert_eq!(fetched.password, None);
        assert!(fetched.interests.is_empty());
        assert!(fetched.quirks.is_empty());
        assert_eq!(fetched.temperature, None);
        assert_eq!(fetched.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn persona_not_found() {
        let db = test_db().await;
        let err = db.persona(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { entity, .. } if entity == "persona"));
    }
}
