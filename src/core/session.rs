//! Session state machine: the transcript plus the lifecycle of one request.
//!
//! The controller never talks to the network itself. `submit` hands back a
//! [`StreamRequest`] for the chat loop to spawn, stream events come back in
//! through [`handle_stream_event`], and tool dispatch results through
//! [`handle_tool_results`]. Every event carries the stream id that produced
//! it; events from superseded streams are dropped, which keeps cancellation
//! and new-chat free of transcript corruption.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::api::{ChatMessage, ChatToolCall};
use crate::core::chat_stream::StreamMessage;
use crate::core::message::Message;
use crate::mcp::ToolError;

/// Tool rounds allowed within a single user turn before the chain is cut.
pub const MAX_TOOL_TURNS: u8 = 5;

/// What the chat loop should do after feeding an event to the controller.
#[derive(Debug)]
pub enum SessionReaction {
    None,
    Redraw,
    DispatchTools {
        stream_id: u64,
        calls: Vec<ChatToolCall>,
    },
    TurnFinished,
}

/// A request the chat loop should put on the wire.
#[derive(Debug)]
pub struct StreamRequest {
    pub stream_id: u64,
    pub cancel_token: CancellationToken,
    pub api_messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    EmptyInput,
    RequestInFlight,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::EmptyInput => write!(f, "Type a message before sending."),
            SubmitError::RequestInFlight => {
                write!(f, "A reply is already streaming; press Esc to interrupt it.")
            }
        }
    }
}

/// The outcome of dispatching one tool call.
#[derive(Debug)]
pub struct ToolOutcome {
    pub call: ChatToolCall,
    pub result: Result<String, ToolError>,
}

struct TurnState {
    stream_id: u64,
    cancel_token: CancellationToken,
    /// Index of the user message that opened this turn.
    user_index: usize,
    /// Index of the assistant message currently receiving chunks.
    assistant_index: Option<usize>,
    hops: u8,
    failed: bool,
    /// Wire-format messages accumulated within this turn: assistant
    /// tool-call requests and their results, replayed verbatim on each hop.
    api_tail: Vec<ChatMessage>,
}

pub struct SessionController {
    transcript: Vec<Message>,
    system_prompt: String,
    next_stream_id: u64,
    turn: Option<TurnState>,
}

impl SessionController {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            transcript: Vec::new(),
            system_prompt: system_prompt.into(),
            next_stream_id: 0,
            turn: None,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    /// Posts an informational line to the transcript outside any turn.
    pub fn push_notice(&mut self, message: Message) {
        self.transcript.push(message);
    }

    /// Opens a new turn for `user_text`. Appends exactly one user message
    /// and returns the request to stream; refuses while a turn is active.
    pub fn submit(&mut self, user_text: &str) -> Result<StreamRequest, SubmitError> {
        if self.turn.is_some() {
            return Err(SubmitError::RequestInFlight);
        }
        let text = user_text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }

        self.transcript.push(Message::user(text));
        let user_index = self.transcript.len() - 1;
        let turn = TurnState {
            stream_id: self.mint_stream_id(),
            cancel_token: CancellationToken::new(),
            user_index,
            assistant_index: None,
            hops: 0,
            failed: false,
            api_tail: Vec::new(),
        };
        let request = self.request_for(&turn);
        self.turn = Some(turn);
        Ok(request)
    }

    /// Feeds one stream event in. Events whose stream id does not match the
    /// active turn are ignored.
    pub fn handle_stream_event(&mut self, message: StreamMessage, stream_id: u64) -> SessionReaction {
        let Some(turn) = self.turn.as_mut() else {
            return SessionReaction::None;
        };
        if turn.stream_id != stream_id {
            return SessionReaction::None;
        }

        match message {
            StreamMessage::Chunk(text) => {
                match turn.assistant_index {
                    Some(index) => self.transcript[index].content.push_str(&text),
                    None => {
                        self.transcript.push(Message::assistant(text));
                        let index = self.transcript.len() - 1;
                        if let Some(turn) = self.turn.as_mut() {
                            turn.assistant_index = Some(index);
                        }
                    }
                }
                SessionReaction::Redraw
            }
            StreamMessage::ToolCalls(calls) => self.on_tool_calls(calls),
            StreamMessage::Error(text) => {
                turn.failed = true;
                self.transcript.push(Message::app_error(text));
                SessionReaction::Redraw
            }
            StreamMessage::End => {
                self.finish_turn();
                SessionReaction::TurnFinished
            }
        }
    }

    /// Records dispatch outcomes and returns the follow-up request for the
    /// next hop. Outcomes from a superseded stream are dropped.
    pub fn handle_tool_results(
        &mut self,
        stream_id: u64,
        outcomes: Vec<ToolOutcome>,
    ) -> Option<StreamRequest> {
        let turn = self.turn.as_mut()?;
        if turn.stream_id != stream_id {
            return None;
        }

        for outcome in outcomes {
            let content = match outcome.result {
                Ok(text) => text,
                Err(err) => err.to_string(),
            };
            self.transcript.push(Message::tool_result(content.clone()));
            if let Some(turn) = self.turn.as_mut() {
                turn.api_tail.push(ChatMessage::tool_result(
                    outcome.call.id,
                    outcome.call.function.name,
                    content,
                ));
            }
        }

        let turn = self.turn.as_mut()?;
        turn.stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        let turn = self.turn.as_ref()?;
        Some(self.request_for(turn))
    }

    /// Interrupts the active request, keeping the transcript. Partial
    /// assistant text stays, explicitly marked interrupted.
    pub fn cancel_turn(&mut self) -> bool {
        let Some(turn) = self.turn.take() else {
            return false;
        };
        turn.cancel_token.cancel();
        self.close_assistant(turn.assistant_index, true);
        true
    }

    /// Cancels any active request and wipes the transcript.
    pub fn new_chat(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.cancel_token.cancel();
        }
        self.transcript.clear();
    }

    fn on_tool_calls(&mut self, calls: Vec<ChatToolCall>) -> SessionReaction {
        let Some(turn) = self.turn.as_mut() else {
            return SessionReaction::None;
        };
        if turn.hops >= MAX_TOOL_TURNS {
            let turn = match self.turn.take() {
                Some(turn) => turn,
                None => return SessionReaction::None,
            };
            self.close_assistant(turn.assistant_index, true);
            self.transcript
                .push(Message::app_error(ToolError::ChainLimit.to_string()));
            return SessionReaction::TurnFinished;
        }
        turn.hops += 1;
        let stream_id = turn.stream_id;

        // The partial assistant text belongs to the tool-call request
        // message on the wire; the next hop streams into a fresh entry.
        let partial = turn
            .assistant_index
            .map(|index| self.transcript[index].content.clone())
            .unwrap_or_default();
        let mut request_message = ChatMessage::assistant_tool_calls(calls.clone());
        request_message.content = partial;
        if let Some(turn) = self.turn.as_mut() {
            turn.api_tail.push(request_message);
            turn.assistant_index = None;
        }

        for call in &calls {
            self.transcript.push(Message::tool_call(format!(
                "{}({})",
                call.function.name, call.function.arguments
            )));
        }

        SessionReaction::DispatchTools { stream_id, calls }
    }

    fn finish_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            self.close_assistant(turn.assistant_index, turn.failed);
        }
    }

    /// Drops an empty in-progress assistant entry, or marks a non-empty one
    /// interrupted when the turn did not complete cleanly.
    fn close_assistant(&mut self, assistant_index: Option<usize>, incomplete: bool) {
        let Some(index) = assistant_index else {
            return;
        };
        if self.transcript[index].content.is_empty() {
            self.transcript.remove(index);
        } else if incomplete {
            self.transcript[index].interrupted = true;
        }
    }

    fn mint_stream_id(&mut self) -> u64 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        id
    }

    fn request_for(&self, turn: &TurnState) -> StreamRequest {
        let mut api_messages = Vec::new();
        if !self.system_prompt.is_empty() {
            api_messages.push(ChatMessage::text("system", self.system_prompt.clone()));
        }
        for message in &self.transcript[..=turn.user_index] {
            if let Some(role) = message.role.to_api_role() {
                api_messages.push(ChatMessage::text(role, message.content.clone()));
            }
        }
        api_messages.extend(turn.api_tail.iter().cloned());
        StreamRequest {
            stream_id: turn.stream_id,
            cancel_token: turn.cancel_token.clone(),
            api_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::TranscriptRole;

    fn controller() -> SessionController {
        SessionController::new("You are a helpful AI assistant.")
    }

    fn call(id: &str, name: &str, arguments: &str) -> ChatToolCall {
        ChatToolCall::new(id, name, arguments)
    }

    fn roles(session: &SessionController) -> Vec<&str> {
        session
            .transcript()
            .iter()
            .map(|message| message.role.as_str())
            .collect()
    }

    #[test]
    fn empty_input_is_refused_without_transcript_changes() {
        let mut session = controller();
        assert!(matches!(session.submit("   \n"), Err(SubmitError::EmptyInput)));
        assert!(session.transcript().is_empty());
        assert!(!session.is_streaming());
    }

    #[test]
    fn submit_appends_exactly_one_user_message_and_builds_the_request() {
        let mut session = controller();
        let request = session.submit("What's 2 + 2?").unwrap();

        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].role.is_user());
        assert!(session.is_streaming());

        assert_eq!(request.api_messages.len(), 2);
        assert_eq!(request.api_messages[0].role, "system");
        assert_eq!(
            request.api_messages[0].content,
            "You are a helpful AI assistant."
        );
        assert_eq!(request.api_messages[1].role, "user");
        assert_eq!(request.api_messages[1].content, "What's 2 + 2?");
    }

    #[test]
    fn second_submit_while_streaming_is_refused() {
        let mut session = controller();
        session.submit("first").unwrap();
        assert!(matches!(
            session.submit("second"),
            Err(SubmitError::RequestInFlight)
        ));
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn chunks_accumulate_into_a_single_assistant_message() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        let id = request.stream_id;

        session.handle_stream_event(StreamMessage::Chunk("Hel".to_string()), id);
        session.handle_stream_event(StreamMessage::Chunk("lo!".to_string()), id);
        let reaction = session.handle_stream_event(StreamMessage::End, id);

        assert!(matches!(reaction, SessionReaction::TurnFinished));
        assert!(!session.is_streaming());
        assert_eq!(roles(&session), vec!["user", "assistant"]);
        assert_eq!(session.transcript()[1].content, "Hello!");
        assert!(!session.transcript()[1].interrupted);
    }

    #[test]
    fn tool_calls_suspend_the_stream_and_dispatch() {
        let mut session = controller();
        let request = session.submit("run it").unwrap();
        let id = request.stream_id;

        session.handle_stream_event(StreamMessage::Chunk("Let me check.".to_string()), id);
        let reaction = session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("call_1", "run_python", r#"{"code":"1+1"}"#)]),
            id,
        );

        let SessionReaction::DispatchTools { stream_id, calls } = reaction else {
            panic!("expected a dispatch reaction");
        };
        assert_eq!(stream_id, id);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            roles(&session),
            vec!["user", "assistant", "tool/call"]
        );
        assert_eq!(
            session.transcript()[2].content,
            r#"run_python({"code":"1+1"})"#
        );
        assert!(session.is_streaming());
    }

    #[test]
    fn tool_results_feed_the_next_hop_request() {
        let mut session = controller();
        let first = session.submit("run it").unwrap();
        let id = first.stream_id;
        session.handle_stream_event(StreamMessage::Chunk("Checking.".to_string()), id);
        session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("call_1", "run_python", r#"{"code":"1+1"}"#)]),
            id,
        );

        let outcome = ToolOutcome {
            call: call("call_1", "run_python", r#"{"code":"1+1"}"#),
            result: Ok("2".to_string()),
        };
        let next = session.handle_tool_results(id, vec![outcome]).unwrap();

        assert_ne!(next.stream_id, id);
        assert_eq!(
            roles(&session),
            vec!["user", "assistant", "tool/call", "tool/result"]
        );
        assert_eq!(session.transcript()[3].content, "2");

        // system, user, assistant tool request, tool result
        assert_eq!(next.api_messages.len(), 4);
        let request_message = &next.api_messages[2];
        assert_eq!(request_message.role, "assistant");
        assert_eq!(request_message.content, "Checking.");
        assert_eq!(
            request_message.tool_calls.as_ref().map(Vec::len),
            Some(1)
        );
        let result_message = &next.api_messages[3];
        assert_eq!(result_message.role, "tool");
        assert_eq!(result_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(result_message.content, "2");
    }

    #[test]
    fn dispatch_errors_become_tool_results_for_the_model() {
        let mut session = controller();
        let request = session.submit("use a bad tool").unwrap();
        let id = request.stream_id;
        session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("call_1", "nonexistent", "{}")]),
            id,
        );

        let outcome = ToolOutcome {
            call: call("call_1", "nonexistent", "{}"),
            result: Err(ToolError::UnknownTool {
                tool_name: "nonexistent".to_string(),
            }),
        };
        let next = session.handle_tool_results(id, vec![outcome]).unwrap();

        let result_message = next.api_messages.last().unwrap();
        assert_eq!(result_message.role, "tool");
        assert_eq!(
            result_message.content,
            "Tool 'nonexistent' not found in active servers"
        );
        assert_eq!(
            session.transcript().last().unwrap().content,
            "Tool 'nonexistent' not found in active servers"
        );
        assert!(session.is_streaming());
    }

    #[test]
    fn the_tool_chain_stops_at_the_hop_limit() {
        let mut session = controller();
        let request = session.submit("loop forever").unwrap();
        let mut id = request.stream_id;

        for _ in 0..MAX_TOOL_TURNS {
            let reaction = session.handle_stream_event(
                StreamMessage::ToolCalls(vec![call("c", "run_python", "{}")]),
                id,
            );
            assert!(matches!(reaction, SessionReaction::DispatchTools { .. }));
            let outcome = ToolOutcome {
                call: call("c", "run_python", "{}"),
                result: Ok("ok".to_string()),
            };
            id = session.handle_tool_results(id, vec![outcome]).unwrap().stream_id;
        }

        let reaction = session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("c", "run_python", "{}")]),
            id,
        );
        assert!(matches!(reaction, SessionReaction::TurnFinished));
        assert!(!session.is_streaming());
        let last = session.transcript().last().unwrap();
        assert_eq!(last.role, TranscriptRole::AppError);
        assert_eq!(last.content, "Maximum tool turns reached");
    }

    #[test]
    fn errors_surface_as_status_messages_and_mark_partials() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        let id = request.stream_id;

        session.handle_stream_event(StreamMessage::Chunk("par".to_string()), id);
        session.handle_stream_event(
            StreamMessage::Error("API error 500".to_string()),
            id,
        );
        session.handle_stream_event(StreamMessage::End, id);

        assert!(!session.is_streaming());
        assert_eq!(roles(&session), vec!["user", "assistant", "app/error"]);
        assert!(session.transcript()[1].interrupted);
        assert_eq!(session.transcript()[1].content, "par");
        assert!(session.transcript()[2].content.contains("API error 500"));
    }

    #[test]
    fn empty_failed_replies_leave_no_assistant_entry() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        let id = request.stream_id;

        session.handle_stream_event(StreamMessage::Error("boom".to_string()), id);
        session.handle_stream_event(StreamMessage::End, id);

        assert_eq!(roles(&session), vec!["user", "app/error"]);
    }

    #[test]
    fn stale_stream_events_are_ignored() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        let old_id = request.stream_id;
        session.new_chat();

        let reaction =
            session.handle_stream_event(StreamMessage::Chunk("late".to_string()), old_id);
        assert!(matches!(reaction, SessionReaction::None));
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn new_chat_clears_the_transcript_and_cancels_the_stream() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        session.handle_stream_event(StreamMessage::Chunk("part".to_string()), request.stream_id);

        session.new_chat();

        assert!(session.transcript().is_empty());
        assert!(!session.is_streaming());
        assert!(request.cancel_token.is_cancelled());
    }

    #[test]
    fn cancel_keeps_the_transcript_and_marks_the_partial() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        session.handle_stream_event(StreamMessage::Chunk("half a rep".to_string()), request.stream_id);

        assert!(session.cancel_turn());
        assert!(!session.is_streaming());
        assert!(request.cancel_token.is_cancelled());
        assert_eq!(roles(&session), vec!["user", "assistant"]);
        assert!(session.transcript()[1].interrupted);

        // Nothing active, nothing to cancel.
        assert!(!session.cancel_turn());
    }

    #[test]
    fn tool_results_after_cancel_are_dropped() {
        let mut session = controller();
        let request = session.submit("hi").unwrap();
        let id = request.stream_id;
        session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("call_1", "run_python", "{}")]),
            id,
        );
        session.new_chat();

        let outcome = ToolOutcome {
            call: call("call_1", "run_python", "{}"),
            result: Ok("2".to_string()),
        };
        assert!(session.handle_tool_results(id, vec![outcome]).is_none());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn history_replays_only_conversation_roles() {
        let mut session = controller();
        let first = session.submit("run it").unwrap();
        let id = first.stream_id;
        session.handle_stream_event(
            StreamMessage::ToolCalls(vec![call("call_1", "run_python", "{}")]),
            id,
        );
        let outcome = ToolOutcome {
            call: call("call_1", "run_python", "{}"),
            result: Ok("2".to_string()),
        };
        let next = session.handle_tool_results(id, vec![outcome]).unwrap();
        session.handle_stream_event(StreamMessage::Chunk("It's 2.".to_string()), next.stream_id);
        session.handle_stream_event(StreamMessage::End, next.stream_id);

        let request = session.submit("thanks").unwrap();
        let api_roles: Vec<&str> = request
            .api_messages
            .iter()
            .map(|message| message.role.as_str())
            .collect();
        assert_eq!(api_roles, vec!["system", "user", "assistant", "user"]);
        assert!(request
            .api_messages
            .iter()
            .all(|message| message.tool_calls.is_none()));
    }

    #[test]
    fn notices_do_not_leak_into_api_history() {
        let mut session = controller();
        session.push_notice(Message::app_info("Good afternoon!"));
        let request = session.submit("hi").unwrap();
        let api_roles: Vec<&str> = request
            .api_messages
            .iter()
            .map(|message| message.role.as_str())
            .collect();
        assert_eq!(api_roles, vec!["system", "user"]);
    }
}
