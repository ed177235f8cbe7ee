// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Conversational agent capability: text in, text out.
//!
//! The orchestrator only depends on [`ConversationalAgent`].
//! [`HttpAgentClient`] implements it against a Letta-style REST API
//! (`POST /v1/agents/{id}/messages`): the response carries a list of
//! messages from which the most recent assistant message's text is
//! extracted. An answer with no usable message is a valid empty result,
//! not an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors surfaced by an agent client.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The request could not be delivered.
    #[error("request failed: {0}")]
    Request(String),
    /// The agent did not answer within the configured timeout.
    #[error("agent timed out after {0} ms")]
    Timeout(u64),
    /// The agent answered with a non-success status.
    #[error("agent API error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Message role in an agent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human input.
    User,
    /// Agent output.
    Assistant,
    /// System instruction.
    System,
}

/// One message in an agent exchange.
#[derive(Debug, Clone, Serialize)]
pub struct AgentMessage {
    /// Who produced the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl AgentMessage {
    /// Convenience constructor for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Conversational agent capability consumed by the orchestrator.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Send `messages` to the agent and return the assistant's reply
    /// text. `Ok(None)` means the agent produced no usable message - a
    /// valid, non-error outcome.
    async fn generate(&self, messages: &[AgentMessage]) -> Result<Option<String>, AgentError>;
}

// ---------------------------------------------------------------------------
// HTTP wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    messages: &'a [AgentMessage],
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    messages: Vec<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl AgentResponse {
    /// The most recent assistant message's text, falling back to the last
    /// message with content, or `None`.
    fn extract_reply(&self) -> Option<String> {
        if let Some(content) = self
            .messages
            .iter()
            .rev()
            .find(|m| m.message_type.as_deref() == Some("assistant_message"))
            .and_then(|m| m.content.clone())
        {
            return Some(content);
        }

        self.messages.iter().rev().find_map(|m| m.content.clone())
    }
}

// ---------------------------------------------------------------------------
// HttpAgentClient
// ---------------------------------------------------------------------------

/// Configuration for [`HttpAgentClient`].
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// API base URL (e.g. `http://localhost:8283`).
    pub base_url: String,
    /// Agent identifier the conversation is scoped to.
    pub agent_id: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl AgentClientConfig {
    /// Defaults: local server, 30 s timeout.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            base_url: "http://localhost:8283".to_string(),
            agent_id: agent_id.into(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// REST client for a Letta-style conversational agent server.
pub struct HttpAgentClient {
    config: AgentClientConfig,
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// Create a client from `config`.
    pub fn new(config: AgentClientConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Request(format!("HTTP client build: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ConversationalAgent for HttpAgentClient {
    async fn generate(&self, messages: &[AgentMessage]) -> Result<Option<String>, AgentError> {
        let url = format!(
            "{}/v1/agents/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            self.config.agent_id
        );

        let mut request = self.client.post(&url).json(&AgentRequest { messages });
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        tracing::debug!(agent = %self.config.agent_id, "HttpAgentClient: sending messages");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(self.config.request_timeout.as_millis() as u64)
            } else {
                AgentError::Request(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api { status, body });
        }

        let parsed: AgentResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Request(format!("response parse: {}", e)))?;

        Ok(parsed.extract_reply())
    }
}

impl std::fmt::Debug for HttpAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentClient")
            .field("base_url", &self.config.base_url)
            .field("agent_id", &self.config.agent_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> AgentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_prefers_assistant_message() {
        let response = parse(
            r#"{"messages": [
                {"message_type": "reasoning_message", "content": "thinking..."},
                {"message_type": "assistant_message", "content": "hello!"},
                {"message_type": "usage_statistics"}
            ]}"#,
        );
        assert_eq!(response.extract_reply().as_deref(), Some("hello!"));
    }

    #[test]
    fn test_extract_takes_most_recent_assistant_message() {
        let response = parse(
            r#"{"messages": [
                {"message_type": "assistant_message", "content": "first"},
                {"message_type": "assistant_message", "content": "second"}
            ]}"#,
        );
        assert_eq!(response.extract_reply().as_deref(), Some("second"));
    }

    #[test]
    fn test_extract_falls_back_to_last_content() {
        let response = parse(
            r#"{"messages": [
                {"message_type": "tool_call_message", "content": "tool output"},
                {"message_type": "usage_statistics"}
            ]}"#,
        );
        assert_eq!(response.extract_reply().as_deref(), Some("tool output"));
    }

    #[test]
    fn test_extract_empty_is_none_not_error() {
        let response = parse(r#"{"messages": []}"#);
        assert!(response.extract_reply().is_none());

        let response = parse(r#"{}"#);
        assert!(response.extract_reply().is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![AgentMessage::user("hi there")];
        let json = serde_json::to_string(&AgentRequest {
            messages: &messages,
        })
        .unwrap();
        assert_eq!(json, r#"{"messages":[{"role":"user","content":"hi there"}]}"#);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let mut config = AgentClientConfig::new("agent-1");
        config.base_url = "http://127.0.0.1:1".to_string();
        config.request_timeout = Duration::from_millis(500);
        let client = HttpAgentClient::new(config).unwrap();

        let result = client.generate(&[AgentMessage::user("hi")]).await;
        assert!(matches!(
            result,
            Err(AgentError::Request(_)) | Err(AgentError::Timeout(_))
        ));
    }
}
