//! Model-inference seam — conversation turns and the completion trait.
//!
//! The production implementation is [`openai::OpenAiClient`]; tests
//! substitute mock implementations of [`ChatModel`].

pub mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Who authored a conversation turn.
///
/// `Inbound` turns come from the scammer, `Outbound` turns are the
/// persona's replies. The provider-specific wire names (user/assistant)
/// are mapped at the client boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Inbound,
    Outbound,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn inbound(content: impl Into<String>) -> Self {
        Self {
            role: Role::Inbound,
            content: content.into(),
        }
    }

    pub fn outbound(content: impl Into<String>) -> Self {
        Self {
            role: Role::Outbound,
            content: content.into(),
        }
    }
}

/// Output shape constraint for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Provider default, free-form text.
    Text,
    /// Force a single JSON object.
    JsonObject,
}

/// One completion request: the full accumulated turn sequence plus
/// sampling parameters.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub response_format: ResponseFormat,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
}

/// One candidate completion.
#[derive(Debug, Clone)]
pub struct ChatChoice {
    /// Text content; providers may return a choice with no content.
    pub content: Option<String>,
}

/// A completion response. Providers may return several candidate choices;
/// callers decide which one to take.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub choices: Vec<ChatChoice>,
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion over the accumulated turns.
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_string_mapping() {
        for role in [Role::System, Role::Inbound, Role::Outbound] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("assistant".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }
}
