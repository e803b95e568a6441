//! OpenAI chat-completions client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::llm::{ChatChoice, ChatCompletion, ChatModel, ChatRequest, ResponseFormat, Role};

/// Client for the OpenAI chat-completions REST API.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, ModelError> {
        let body = WireRequest::from_request(&request);

        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ModelError::RequestFailed {
                reason: format!("{status}: {detail}"),
            });
        }

        let completion: WireCompletion =
            resp.json().await.map_err(|e| ModelError::InvalidResponse {
                reason: e.to_string(),
            })?;

        Ok(ChatCompletion {
            choices: completion
                .choices
                .into_iter()
                .map(|choice| ChatChoice {
                    content: choice.message.content,
                })
                .collect(),
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Inbound => "user",
        Role::Outbound => "assistant",
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a ChatRequest) -> Self {
        let response_format = match request.response_format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonObject => Some(WireResponseFormat {
                format: "json_object",
            }),
        };

        Self {
            model: &request.model,
            messages: request
                .turns
                .iter()
                .map(|turn| WireMessage {
                    role: wire_role(turn.role),
                    content: &turn.content,
                })
                .collect(),
            response_format,
            top_p: request.top_p,
            temperature: request.temperature,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

#[derive(Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Turn;

    fn request(format: ResponseFormat) -> ChatRequest {
        ChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            turns: vec![
                Turn::system("be brief"),
                Turn::outbound("{ \"understood\": true }"),
                Turn::inbound("hello"),
            ],
            response_format: format,
            top_p: None,
            temperature: Some(0.5),
        }
    }

    #[test]
    fn test_wire_request_maps_roles_and_format() {
        let req = request(ResponseFormat::JsonObject);
        let value = serde_json::to_value(WireRequest::from_request(&req)).unwrap();

        assert_eq!(value["model"], "gpt-3.5-turbo");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["messages"][2]["role"], "user");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["temperature"], 0.5);
        // Unset sampling parameters must not reach the wire.
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn test_wire_request_text_format_is_omitted() {
        let req = request(ResponseFormat::Text);
        let value = serde_json::to_value(WireRequest::from_request(&req)).unwrap();
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn test_wire_completion_keeps_all_choices() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "first"}},
                {"index": 1, "message": {"role": "assistant", "content": null}},
                {"index": 2, "message": {"role": "assistant", "content": "last"}}
            ]
        }"#;
        let completion: WireCompletion = serde_json::from_str(raw).unwrap();
        assert_eq!(completion.choices.len(), 3);
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("first"));
        assert!(completion.choices[1].message.content.is_none());
        assert_eq!(completion.choices[2].message.content.as_deref(), Some("last"));
    }

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let client = OpenAiClient::new(SecretString::from("sk-test"), "https://api.openai.com/v1/");
        assert_eq!(
            client.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
