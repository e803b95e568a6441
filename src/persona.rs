//! Persona records — the fabricated identity a reply session speaks as.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Postal address handed out when a scammer asks where the persona lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip: String,
}

/// One persona: identity attributes plus the model parameters used when
/// replying as this persona. Optional fields are simply omitted from the
/// session priming when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaContext {
    pub name: String,
    pub gender: String,
    pub birthday: NaiveDate,
    pub email: String,
    pub phone: Option<String>,
    pub address: PostalAddress,
    /// Password the persona will "share" if pressed for one.
    pub password: Option<String>,
    pub interests: Vec<String>,
    pub quirks: Vec<String>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    /// Overrides the default completion model when set.
    pub model: Option<String>,
}

#[cfg(test)]
impl PersonaContext {
    /// Fixture persona shared across test modules.
    pub(crate) fn sample() -> Self {
        Self {
            name: "Sue Ellen Braithwaite".to_string(),
            gender: "female".to_string(),
            birthday: NaiveDate::from_ymd_opt(1948, 3, 14).unwrap(),
            email: "sue.ellen@bait.example.com".to_string(),
            phone: None,
            address: PostalAddress {
                street: "12 Petunia Lane".to_string(),
                city: "Dullsville".to_string(),
                state: "Ohio".to_string(),
                country: "USA".to_string(),
                zip: "44101".to_string(),
            },
            password: Some("hunter2".to_string()),
            interests: vec!["pigeon racing".to_string(), "crosswords".to_string()],
            quirks: vec!["types only in lowercase".to_string()],
            top_p: None,
            temperature: None,
            model: None,
        }
    }
}

/// Join a list column value for storage. Empty lists store as NULL.
pub fn join_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

/// Split a stored list column value. NULL reads back as an empty list.
pub fn split_list(stored: Option<String>) -> Vec<String> {
    stored
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
