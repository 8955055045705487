//! Streaming chat requests.
//!
//! One tokio task per request. Events flow back over an unbounded channel
//! tagged with the stream id that spawned them; the UI loop drops events from
//! superseded ids, which is what makes cancellation safe.

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{
    ChatMessage, ChatRequest, ChatResponse, ChatToolCall, ChatToolDefinition, ToolCallAccumulator,
};
use crate::utils::url::construct_api_url;

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    /// The model suspended its reply to request tool invocations. Terminal
    /// for this stream; the session continues the turn with a new stream.
    ToolCalls(Vec<ChatToolCall>),
    Error(String),
    End,
}

/// Per-stream SSE state: tool-call fragments accumulate across lines until a
/// finish marker flushes them.
pub struct SseParser {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
    tool_calls: ToolCallAccumulator,
}

impl SseParser {
    pub fn new(tx: mpsc::UnboundedSender<(StreamMessage, u64)>, stream_id: u64) -> Self {
        Self {
            tx,
            stream_id,
            tool_calls: ToolCallAccumulator::default(),
        }
    }

    fn send(&self, message: StreamMessage) {
        let _ = self.tx.send((message, self.stream_id));
    }

    /// Returns true when the stream is finished and the task should stop.
    pub fn handle_line(&mut self, line: &str) -> bool {
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            return false;
        };

        if payload == "[DONE]" {
            return self.finish_stream();
        }

        match serde_json::from_str::<ChatResponse>(payload) {
            Ok(response) => {
                let Some(choice) = response.choices.into_iter().next() else {
                    return false;
                };
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        self.send(StreamMessage::Chunk(content));
                    }
                }
                if let Some(deltas) = choice.delta.tool_calls {
                    for delta in deltas {
                        self.tool_calls.absorb(delta);
                    }
                }
                false
            }
            Err(_) => {
                if payload.trim().is_empty() {
                    return false;
                }
                self.send(StreamMessage::Error(format_api_error(payload)));
                self.send(StreamMessage::End);
                true
            }
        }
    }

    fn finish_stream(&mut self) -> bool {
        let pending = std::mem::take(&mut self.tool_calls);
        if pending.is_empty() {
            self.send(StreamMessage::End);
        } else {
            self.send(StreamMessage::ToolCalls(pending.finish()));
        }
        true
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Renders an API error body for the transcript: pretty JSON fenced block
/// with a one-line summary when the payload exposes one.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {summary}\n```json\n{pretty_json}\n```");
                }
            }
            return format!("API Error:\n```json\n{pretty_json}\n```");
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub provider_id: String,
    pub model: String,
    pub api_messages: Vec<ChatMessage>,
    pub tools: Option<Vec<ChatToolDefinition>>,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                api_key,
                provider_id,
                model,
                api_messages,
                tools,
                cancel_token,
                stream_id,
            } = params;

            debug!(stream_id, model = %model, "Spawning chat stream");

            let request = ChatRequest {
                model,
                messages: api_messages,
                stream: true,
                tools,
            };

            tokio::select! {
                _ = run_stream(client, base_url, api_key, provider_id, request, tx.clone(), stream_id, cancel_token.clone()) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "Chat stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stream(
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider_id: String,
    request: ChatRequest,
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
    cancel_token: tokio_util::sync::CancellationToken,
) {
    let chat_url = construct_api_url(&base_url, "chat/completions");
    let http_request = crate::utils::auth::add_auth_headers(
        client.post(chat_url).header("Content-Type", "application/json"),
        &provider_id,
        &api_key,
    );

    let response = match http_request.json(&request).send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send((StreamMessage::Error(format_api_error(&e.to_string())), stream_id));
            let _ = tx.send((StreamMessage::End, stream_id));
            return;
        }
    };

    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let _ = tx.send((StreamMessage::Error(format_api_error(&error_text)), stream_id));
        let _ = tx.send((StreamMessage::End, stream_id));
        return;
    }

    let mut parser = SseParser::new(tx.clone(), stream_id);
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        if cancel_token.is_cancelled() {
            return;
        }

        let Ok(chunk_bytes) = chunk else {
            break;
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(s) => s.trim().to_string(),
                Err(e) => {
                    debug!(stream_id, "Invalid UTF-8 in stream: {e}");
                    buffer.drain(..=newline_pos);
                    continue;
                }
            };

            buffer.drain(..=newline_pos);
            if parser.handle_line(&line) {
                return;
            }
        }
    }

    // Connection ended without a [DONE] marker.
    parser.finish_stream();
}
