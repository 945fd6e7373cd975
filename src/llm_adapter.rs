//! The narrow LLM-adapter contract consumed by the supervisor loop.
//!
//! The coordination engine treats the LLM as an opaque request-response
//! collaborator (spec.md §1): prompt engineering, provider selection, and
//! response streaming live on the other side of this trait. What matters to
//! the supervisor is that errors are surfaced distinctly enough to decide
//! retry-with-backoff, tactical intervention, or a hard blocker.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation, or a tool-call result being replayed
/// back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set when this message replays a tool's result back to the model.
    pub tool_call_id: Option<String>,
    pub is_error: bool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            is_error,
        }
    }
}

/// The purpose tag a caller attaches to a completion request, used purely
/// for token-accounting and log correlation — never interpreted by the
/// adapter to change behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPurpose {
    TaskDispatch,
    Retry,
    CodeReview,
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub purpose: CompletionPurpose,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One chunk of a streamed completion.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
    pub done: bool,
}

/// A lazy finite sequence of text chunks, modeling the source's async
/// generator streaming contract (spec.md §9).
pub type TextStream = std::pin::Pin<Box<dyn futures::Stream<Item = Result<StreamChunk>> + Send>>;

/// The only contract the supervisor depends on. Implementations may call
/// out to any provider; authentication, rate-limit, connection, and timeout
/// failures must surface as the matching `SpiralError` variant so the
/// supervisor can choose retry-with-backoff vs. a blocker.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Streams a completion as text chunks. The default implementation is
    /// not provided — adapters without native streaming may synthesize a
    /// single-chunk stream from `complete`.
    async fn stream(&self, request: CompletionRequest) -> Result<TextStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;

    struct EchoAdapter;

    #[async_trait]
    impl LlmAdapter for EchoAdapter {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let content = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(CompletionResponse {
                content,
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                model: "echo".to_string(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }

        async fn stream(&self, request: CompletionRequest) -> Result<TextStream> {
            let response = self.complete(request).await?;
            let chunk = StreamChunk {
                text: response.content,
                done: true,
            };
            Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
        }
    }

    #[tokio::test]
    async fn echo_adapter_returns_last_message() {
        let adapter = EchoAdapter;
        let request = CompletionRequest {
            messages: vec![Message::user("hello")],
            purpose: CompletionPurpose::TaskDispatch,
            tools: vec![],
            max_tokens: 100,
            temperature: 0.0,
            system: None,
        };
        let response = adapter.complete(request).await.unwrap();
        assert_eq!(response.content, "hello");
    }
}
