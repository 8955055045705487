//! Application state shared by the chat loop, the renderer, and commands.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Timelike};
use ratatui::style::Style;
use reqwest::Client;
use tui_textarea::TextArea;

use crate::api::ChatToolCall;
use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::providers::ProviderSession;
use crate::core::session::{SessionController, StreamRequest};
use crate::mcp::McpRegistry;
use crate::utils::logging::LoggingState;
use crate::utils::scroll::ScrollState;

/// Work the chat loop carries out once app state has settled, outside the
/// app lock.
#[derive(Debug)]
pub enum AppCommand {
    SpawnStream(StreamRequest),
    DispatchTools {
        stream_id: u64,
        calls: Vec<ChatToolCall>,
    },
    ReloadServers,
    ShowServers,
    ToggleServer(String),
    ListModels,
}

pub struct App {
    pub session: SessionController,
    pub provider: ProviderSession,
    pub client: Client,
    pub config: Config,
    pub config_path: PathBuf,
    pub registry: Arc<McpRegistry>,
    pub logging: LoggingState,
    pub input: TextArea<'static>,
    pub scroll: ScrollState,
    pub status: Option<String>,
    /// Connected/configured MCP server counts for the title bar.
    pub mcp_health: Option<(usize, usize)>,
    pub exit_requested: bool,
    /// Transcript entries up to this index have been written to the chat log.
    logged_upto: usize,
}

impl App {
    pub fn new(
        provider: ProviderSession,
        config: Config,
        config_path: PathBuf,
        registry: Arc<McpRegistry>,
        logging: LoggingState,
    ) -> Self {
        let session = SessionController::new(config.system_prompt.clone());
        App {
            session,
            provider,
            client: Client::new(),
            config,
            config_path,
            registry,
            logging,
            input: build_textarea(),
            scroll: ScrollState::new(),
            status: None,
            mcp_health: None,
            exit_requested: false,
            logged_upto: 0,
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn input_text(&self) -> String {
        self.input.lines().join("\n")
    }

    pub fn clear_input(&mut self) {
        self.input = build_textarea();
    }

    /// Posts the time-of-day greeting that opens every chat.
    pub fn greet(&mut self) {
        let part = day_part(Local::now().hour());
        self.session.push_notice(Message::app_info(format!(
            "Good {part}! You're chatting with {} ({}). Type /help for commands.",
            self.provider.provider_display_name, self.provider.model
        )));
    }

    /// Sends the composed input as a chat message. On success the input box
    /// clears and the returned command spawns the stream.
    pub fn submit_input(&mut self) -> Option<AppCommand> {
        let text = self.input_text();
        match self.session.submit(&text) {
            Ok(request) => {
                self.clear_input();
                self.status = None;
                self.scroll.scroll_to_bottom();
                self.flush_log();
                Some(AppCommand::SpawnStream(request))
            }
            Err(err) => {
                self.status = Some(err.to_string());
                None
            }
        }
    }

    /// Interrupts the in-flight request, if any.
    pub fn cancel_streaming(&mut self) -> bool {
        if self.session.cancel_turn() {
            self.status = Some("Response interrupted.".to_string());
            self.flush_log();
            true
        } else {
            false
        }
    }

    /// Starts over: clears the transcript, the scroll position, and the log
    /// watermark, then greets again.
    pub fn new_chat(&mut self) {
        self.session.new_chat();
        self.logged_upto = 0;
        self.scroll.reset();
        self.status = None;
        self.greet();
    }

    /// Writes transcript entries that became final since the last flush to
    /// the chat log. Called when a message is sent and when a turn settles,
    /// so in-progress assistant text is never logged half-streamed.
    pub fn flush_log(&mut self) {
        let mut failure = None;
        for message in &self.session.transcript()[self.logged_upto..] {
            if let Err(err) = self.logging.record(message) {
                failure = Some(err.to_string());
                break;
            }
        }
        self.logged_upto = self.session.transcript().len();
        if let Some(err) = failure {
            self.status = Some(format!("Logging failed: {err}"));
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        let provider = ProviderSession {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:9999/v1".to_string(),
            provider_id: "openai".to_string(),
            provider_display_name: "OpenAI".to_string(),
            model: "test-model".to_string(),
        };
        App::new(
            provider,
            Config::default(),
            std::env::temp_dir().join("confab-test-config.toml"),
            Arc::new(McpRegistry::default()),
            LoggingState::new(),
        )
    }
}

fn build_textarea() -> TextArea<'static> {
    let mut input = TextArea::default();
    input.set_cursor_line_style(Style::default());
    input.set_placeholder_text("Type a message");
    input
}

fn day_part(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::StreamMessage;
    use crate::core::message::TranscriptRole;
    use tempfile::TempDir;

    #[test]
    fn submit_moves_the_input_into_the_session() {
        let mut app = App::new_for_test();
        app.input.insert_str("hello there");

        let command = app.submit_input();
        assert!(matches!(command, Some(AppCommand::SpawnStream(_))));
        assert_eq!(app.input_text(), "");
        let transcript = app.session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, TranscriptRole::User);
        assert_eq!(transcript[0].content, "hello there");
    }

    #[test]
    fn empty_input_sets_a_status_instead_of_sending() {
        let mut app = App::new_for_test();
        app.input.insert_str("   ");

        assert!(app.submit_input().is_none());
        assert_eq!(app.status.as_deref(), Some("Type a message before sending."));
        assert!(app.session.transcript().is_empty());
    }

    #[test]
    fn submitting_while_streaming_is_refused() {
        let mut app = App::new_for_test();
        app.input.insert_str("first");
        app.submit_input().unwrap();

        app.input.insert_str("second");
        assert!(app.submit_input().is_none());
        assert_eq!(
            app.status.as_deref(),
            Some("A reply is already streaming; press Esc to interrupt it.")
        );
    }

    #[test]
    fn new_chat_clears_state_and_greets_again() {
        let mut app = App::new_for_test();
        app.input.insert_str("hello");
        app.submit_input().unwrap();
        app.scroll.offset = 7;
        app.set_status("leftover");

        app.new_chat();

        let transcript = app.session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, TranscriptRole::AppInfo);
        assert!(transcript[0].content.contains("test-model"));
        assert_eq!(app.scroll.offset, 0);
        assert!(app.status.is_none());
    }

    #[test]
    fn greeting_names_the_provider_and_model() {
        let mut app = App::new_for_test();
        app.greet();
        let greeting = &app.session.transcript()[0];
        assert!(greeting.content.contains("OpenAI"));
        assert!(greeting.content.contains("test-model"));
        assert!(greeting.content.starts_with("Good "));
    }

    #[test]
    fn day_part_covers_the_clock() {
        assert_eq!(day_part(6), "morning");
        assert_eq!(day_part(11), "morning");
        assert_eq!(day_part(12), "afternoon");
        assert_eq!(day_part(17), "afternoon");
        assert_eq!(day_part(18), "evening");
        assert_eq!(day_part(2), "evening");
    }

    #[test]
    fn cancel_without_a_stream_is_a_no_op() {
        let mut app = App::new_for_test();
        assert!(!app.cancel_streaming());
        assert!(app.status.is_none());
    }

    #[test]
    fn finished_turns_flush_to_the_chat_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log").to_string_lossy().into_owned();
        let mut app = App::new_for_test();
        app.logging.set_log_file(path.clone()).unwrap();

        app.input.insert_str("what is two plus two");
        let command = app.submit_input().unwrap();
        let stream_id = match command {
            AppCommand::SpawnStream(request) => request.stream_id,
            other => panic!("unexpected command: {other:?}"),
        };

        app.session
            .handle_stream_event(StreamMessage::Chunk("Four.".to_string()), stream_id);
        app.session
            .handle_stream_event(StreamMessage::End, stream_id);
        app.flush_log();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("You: what is two plus two"));
        assert!(contents.contains("Four."));
    }

    #[test]
    fn log_watermark_skips_entries_from_before_enabling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log").to_string_lossy().into_owned();
        let mut app = App::new_for_test();

        app.greet();
        app.flush_log(); // logging disabled; watermark still advances

        app.logging.set_log_file(path.clone()).unwrap();
        app.input.insert_str("logged line");
        app.submit_input().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("You: logged line"));
        assert!(!contents.contains("Good "));
    }
}
