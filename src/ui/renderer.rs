use crate::core::app::App;
use crate::core::message::{Message, TranscriptRole};
use crate::ui::markdown::render_markdown;
use crate::utils::wrap::wrap_styled_lines;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use tui_textarea::TextArea;

const MAX_INPUT_LINES: u16 = 6;
const USER_CONTINUATION_INDENT: &str = "     ";

pub fn ui(f: &mut Frame, app: &mut App) {
    let input_height = input_area_height(&app.input);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(input_height + 2), // +2 for borders
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_transcript(f, app, chunks[0]);
    draw_input(f, app, chunks[1]);
    draw_status(f, app, chunks[2]);
}

pub(crate) fn input_area_height(input: &TextArea) -> u16 {
    (input.lines().len() as u16).clamp(1, MAX_INPUT_LINES)
}

fn draw_transcript(f: &mut Frame, app: &mut App, area: Rect) {
    let mcp = match app.mcp_health {
        Some((connected, total)) => format!(" • mcp {connected}/{total}"),
        None => String::new(),
    };
    let title = format!(
        "Confab v{} - {} ({}){mcp} • Logging: {}",
        env!("CARGO_PKG_VERSION"),
        app.provider.provider_display_name,
        app.provider.model,
        app.logging.get_status_string()
    );

    let lines = transcript_lines(app.session.transcript());
    let wrapped = wrap_styled_lines(&lines, area.width);

    let viewport = area.height.saturating_sub(1) as usize; // account for title
    app.scroll.clamp(wrapped.len(), viewport);
    let start = app.scroll.offset.min(wrapped.len());
    let end = (start + viewport).min(wrapped.len());
    let visible: Vec<Line<'static>> = wrapped[start..end].to_vec();

    let paragraph = Paragraph::new(visible).block(Block::default().title(title));
    f.render_widget(paragraph, area);
}

fn draw_input(f: &mut Frame, app: &mut App, area: Rect) {
    let title = if app.session.is_streaming() {
        "Streaming reply (Esc to interrupt)"
    } else {
        "Type a message (Enter to send, Alt+Enter for newline)"
    };
    app.input.set_block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(&app.input, area);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(status) = app.status.as_deref() {
        Line::from(Span::styled(
            status.to_string(),
            Style::default().fg(Color::Yellow),
        ))
    } else if app.session.is_streaming() {
        Line::from(Span::styled(
            "Waiting for the reply to finish".to_string(),
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(Span::styled(
            "Enter sends • PageUp/PageDown scroll • /help for commands • Ctrl+C quits".to_string(),
            Style::default().fg(Color::DarkGray),
        ))
    };
    f.render_widget(Paragraph::new(line), area);
}

fn user_prefix_style() -> Style {
    Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD)
}

fn user_text_style() -> Style {
    Style::default().fg(Color::Cyan)
}

fn notice_style(role: TranscriptRole) -> Style {
    match role {
        TranscriptRole::AppWarning => Style::default().fg(Color::Yellow),
        TranscriptRole::AppError => Style::default().fg(Color::Red),
        _ => Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    }
}

fn tool_call_style() -> Style {
    Style::default().fg(Color::Magenta)
}

fn tool_result_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn interrupted_marker() -> Line<'static> {
    Line::from(Span::styled(
        "(response interrupted)".to_string(),
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    ))
}

/// Build the unwrapped display lines for the whole transcript. One blank line
/// separates messages, matching the spacing written to chat logs.
pub(crate) fn transcript_lines(messages: &[Message]) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in messages {
        match msg.role {
            TranscriptRole::User => {
                let mut first = true;
                for content_line in msg.content.lines() {
                    if first {
                        lines.push(Line::from(vec![
                            Span::styled("You: ", user_prefix_style()),
                            Span::styled(content_line.to_string(), user_text_style()),
                        ]));
                        first = false;
                    } else {
                        lines.push(Line::from(Span::styled(
                            format!("{USER_CONTINUATION_INDENT}{content_line}"),
                            user_text_style(),
                        )));
                    }
                }
                if first {
                    lines.push(Line::from(Span::styled("You: ", user_prefix_style())));
                }
            }
            TranscriptRole::Assistant => {
                lines.extend(render_markdown(&msg.content));
                if msg.interrupted {
                    lines.push(interrupted_marker());
                }
            }
            TranscriptRole::AppInfo | TranscriptRole::AppWarning | TranscriptRole::AppError => {
                let style = notice_style(msg.role);
                for content_line in msg.content.lines() {
                    lines.push(Line::from(Span::styled(content_line.to_string(), style)));
                }
            }
            TranscriptRole::ToolCall => {
                for (i, content_line) in msg.content.lines().enumerate() {
                    let text = if i == 0 {
                        format!("[tool] {content_line}")
                    } else {
                        content_line.to_string()
                    };
                    lines.push(Line::from(Span::styled(text, tool_call_style())));
                }
            }
            TranscriptRole::ToolResult => {
                for (i, content_line) in msg.content.lines().enumerate() {
                    let text = if i == 0 {
                        format!("[tool] {content_line}")
                    } else {
                        content_line.to_string()
                    };
                    lines.push(Line::from(Span::styled(text, tool_result_style())));
                }
            }
        }
        lines.push(Line::from("")); // spacing between messages
    }

    while lines
        .last()
        .is_some_and(|l| l.spans.iter().all(|s| s.content.is_empty()))
    {
        lines.pop();
    }
    lines
}
