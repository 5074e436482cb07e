//! OpenAI-compatible chat completions with tool calling

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{ApiKeys, LlmConfig};
use crate::memory::{HistoryEntry, Role};
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry};
use crate::{Error, Result};

/// Input for one assistant reply
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// System instructions, context included
    pub system: String,
    /// Prior turns, oldest first
    pub history: Vec<HistoryEntry>,
    /// What the user just said
    pub user: String,
}

/// A text generation service
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a reply, running tool calls until the model answers or the
    /// step budget runs out
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn generate(
        &self,
        request: &GenerationRequest,
        tools: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<String>;

    /// Single-shot completion without tools
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl Message {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_owned(),
            content: Some(content.to_owned()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool(id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(id.to_owned()),
            ..Self::new("tool", content)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: FunctionCall,
}

fn function_type() -> String {
    "function".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Chat client for any `OpenAI`-compatible endpoint
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    max_steps: u32,
}

impl ChatClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the `OpenAI` API key is missing
    pub fn from_config(llm: &LlmConfig, keys: &ApiKeys) -> Result<Self> {
        let api_key = keys
            .openai
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for chat".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            max_steps: llm.max_steps.max(1),
        })
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: Option<&str>,
    ) -> Result<Choice> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            tools,
            tool_choice,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Generation(format!("chat API error {status}: {body}")));
        }

        let response: ChatResponse = response.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Generation("response had no choices".to_string()))
    }
}

fn history_messages(system: &str, history: &[HistoryEntry], user: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::new("system", system));
    for entry in history {
        let role = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(Message::new(role, &entry.text));
    }
    messages.push(Message::new("user", user));
    messages
}

#[async_trait]
impl Generator for ChatClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        tools: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<String> {
        tracing::info!(model = %self.model, "generating reply");

        let definitions = tools.definitions();
        let offered = (!definitions.is_empty()).then_some(definitions.as_slice());
        let mut messages = history_messages(&request.system, &request.history, &request.user);
        let mut final_text = String::new();

        for step in 0..self.max_steps {
            // On the last step the model must answer in text
            let tool_choice = (offered.is_some() && step + 1 == self.max_steps).then_some("none");
            let choice = self.chat(&messages, offered, tool_choice).await?;

            // Overwrite each step so only the final answer is kept
            if let Some(text) = &choice.message.content {
                final_text.clone_from(text);
            }

            let tool_calls = choice.message.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                tracing::debug!(step, finish = ?choice.finish_reason, "model answered");
                break;
            }

            messages.push(choice.message);
            for call in &tool_calls {
                let result = tools
                    .execute(&call.function.name, &call.function.arguments, ctx)
                    .await
                    .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string());
                messages.push(Message::tool(&call.id, &result));
            }
        }

        if final_text.trim().is_empty() {
            return Err(Error::Generation("model returned no text".to_string()));
        }

        tracing::debug!(response_len = final_text.len(), "reply generated");
        Ok(final_text)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = history_messages(system, &[], user);
        let choice = self.chat(&messages, None, None).await?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_response_parses() {
        let json = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add_todo", "arguments": "{\"text\":\"milk\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "add_todo");
    }

    #[test]
    fn test_tool_message_shape() {
        let value = serde_json::to_value(Message::tool("call_1", "{}")).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn test_history_messages_order() {
        let history = vec![
            HistoryEntry {
                role: Role::User,
                text: "hi".to_string(),
                at: chrono::Utc::now(),
            },
            HistoryEntry {
                role: Role::Assistant,
                text: "hello".to_string(),
                at: chrono::Utc::now(),
            },
        ];
        let roles: Vec<_> = history_messages("sys", &history, "now")
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let result = ChatClient::from_config(&LlmConfig::default(), &ApiKeys::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
