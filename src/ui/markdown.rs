//! Markdown rendering for assistant replies.
//!
//! Turns message content into styled ratatui lines: headings, emphasis,
//! inline code, fenced code blocks (highlighted through `utils::syntax`),
//! lists, block quotes, links, and a plain row-per-line rendition of tables.
//! Wrapping happens later, in the renderer, so lines here are unbounded.

use crate::utils::syntax::{highlight_code_block, CODE_BLOCK_BG};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

#[derive(Clone, Debug)]
enum ListKind {
    Unordered,
    Ordered(u64),
}

struct TableBuilder {
    rows: Vec<(Vec<String>, bool)>,
    current_row: Vec<String>,
    current_cell: String,
    in_header: bool,
}

impl TableBuilder {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            current_row: Vec::new(),
            current_cell: String::new(),
            in_header: false,
        }
    }

    fn push_text(&mut self, text: &str) {
        self.current_cell.push_str(text);
    }

    fn end_cell(&mut self) {
        self.current_row.push(std::mem::take(&mut self.current_cell));
    }

    fn end_row(&mut self) {
        let row = std::mem::take(&mut self.current_row);
        self.rows.push((row, self.in_header));
    }

    fn render(self) -> Vec<Line<'static>> {
        self.rows
            .into_iter()
            .map(|(cells, header)| {
                let style = if header {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(cells.join(" | "), style))
            })
            .collect()
    }
}

fn heading_style(level: u8) -> Style {
    let style = Style::default().add_modifier(Modifier::BOLD);
    if level <= 2 {
        style.fg(Color::Cyan)
    } else {
        style
    }
}

fn inline_code_style() -> Style {
    Style::default().fg(Color::Yellow)
}

fn blockquote_style() -> Style {
    Style::default()
        .fg(Color::DarkGray)
        .add_modifier(Modifier::ITALIC)
}

fn list_marker_style() -> Style {
    Style::default().fg(Color::Magenta)
}

fn link_style() -> Style {
    Style::default()
        .fg(Color::Blue)
        .add_modifier(Modifier::UNDERLINED)
}

fn link_target_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn detab(s: &str) -> String {
    s.replace('\t', "    ")
}

pub fn render_markdown(content: &str) -> Vec<Line<'static>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(content, options);

    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut style_stack: Vec<Style> = Vec::new();

    let mut list_stack: Vec<ListKind> = Vec::new();
    // (url, index of the first span belonging to the link text)
    let mut current_link: Option<(String, usize)> = None;
    // language hint while inside a fenced block
    let mut in_code_block: Option<String> = None;
    let mut code_buf = String::new();
    let mut table: Option<TableBuilder> = None;

    let flush = |lines: &mut Vec<Line<'static>>, current: &mut Vec<Span<'static>>| {
        if !current.is_empty() {
            lines.push(Line::from(std::mem::take(current)));
        }
    };

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => {}
                Tag::Heading { level, .. } => {
                    flush(&mut lines, &mut current);
                    style_stack.push(heading_style(level as u8));
                }
                Tag::BlockQuote(_) => {
                    style_stack.push(blockquote_style());
                }
                Tag::List(start) => {
                    list_stack.push(match start {
                        Some(n) => ListKind::Ordered(n),
                        None => ListKind::Unordered,
                    });
                }
                Tag::Item => {
                    flush(&mut lines, &mut current);
                    let indent = "  ".repeat(list_stack.len().saturating_sub(1));
                    let marker = match list_stack.last_mut() {
                        Some(ListKind::Ordered(n)) => {
                            let cur = *n;
                            *n += 1;
                            format!("{indent}{cur}. ")
                        }
                        _ => format!("{indent}- "),
                    };
                    current.push(Span::styled(marker, list_marker_style()));
                }
                Tag::CodeBlock(kind) => {
                    flush(&mut lines, &mut current);
                    in_code_block = Some(match kind {
                        CodeBlockKind::Fenced(lang) => lang.to_string(),
                        _ => String::new(),
                    });
                    code_buf.clear();
                }
                Tag::Emphasis => {
                    let new = style_stack
                        .last()
                        .copied()
                        .unwrap_or_default()
                        .add_modifier(Modifier::ITALIC);
                    style_stack.push(new);
                }
                Tag::Strong => {
                    let new = style_stack
                        .last()
                        .copied()
                        .unwrap_or_default()
                        .add_modifier(Modifier::BOLD);
                    style_stack.push(new);
                }
                Tag::Strikethrough => {
                    let new = style_stack
                        .last()
                        .copied()
                        .unwrap_or_default()
                        .add_modifier(Modifier::CROSSED_OUT);
                    style_stack.push(new);
                }
                Tag::Link { dest_url, .. } => {
                    style_stack.push(link_style());
                    current_link = Some((dest_url.to_string(), current.len()));
                }
                Tag::Table(_) => {
                    flush(&mut lines, &mut current);
                    table = Some(TableBuilder::new());
                }
                Tag::TableHead => {
                    if let Some(t) = table.as_mut() {
                        t.in_header = true;
                    }
                }
                Tag::TableRow | Tag::TableCell => {}
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Paragraph => {
                    flush(&mut lines, &mut current);
                    lines.push(Line::from(""));
                }
                TagEnd::Heading(_) => {
                    flush(&mut lines, &mut current);
                    lines.push(Line::from(""));
                    style_stack.pop();
                }
                TagEnd::BlockQuote(_) => {
                    flush(&mut lines, &mut current);
                    lines.push(Line::from(""));
                    style_stack.pop();
                }
                TagEnd::List(_) => {
                    flush(&mut lines, &mut current);
                    if list_stack.len() == 1 {
                        lines.push(Line::from(""));
                    }
                    list_stack.pop();
                }
                TagEnd::Item => {
                    flush(&mut lines, &mut current);
                }
                TagEnd::CodeBlock => {
                    let lang = in_code_block.take().unwrap_or_default();
                    match highlight_code_block(&lang, &code_buf) {
                        Some(mut highlighted) => lines.append(&mut highlighted),
                        None => {
                            let style = Style::default().bg(CODE_BLOCK_BG);
                            for l in code_buf.trim_end_matches('\n').split('\n') {
                                lines.push(Line::from(Span::styled(l.to_string(), style)));
                            }
                        }
                    }
                    lines.push(Line::from(""));
                }
                TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                    style_stack.pop();
                }
                TagEnd::Link => {
                    style_stack.pop();
                    if let Some((url, start)) = current_link.take() {
                        let text: String = current[start..]
                            .iter()
                            .map(|s| s.content.as_ref())
                            .collect();
                        if !url.is_empty() && text != url {
                            current.push(Span::styled(format!(" ({url})"), link_target_style()));
                        }
                    }
                }
                TagEnd::Table => {
                    if let Some(t) = table.take() {
                        lines.extend(t.render());
                        lines.push(Line::from(""));
                    }
                }
                TagEnd::TableHead => {
                    if let Some(t) = table.as_mut() {
                        t.end_row();
                        t.in_header = false;
                    }
                }
                TagEnd::TableRow => {
                    if let Some(t) = table.as_mut() {
                        t.end_row();
                    }
                }
                TagEnd::TableCell => {
                    if let Some(t) = table.as_mut() {
                        t.end_cell();
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block.is_some() {
                    code_buf.push_str(&detab(&text));
                } else if let Some(t) = table.as_mut() {
                    t.push_text(&detab(&text));
                } else {
                    let style = style_stack.last().copied().unwrap_or_default();
                    current.push(Span::styled(detab(&text), style));
                }
            }
            Event::Code(code) => {
                if let Some(t) = table.as_mut() {
                    t.push_text(&detab(&code));
                } else {
                    current.push(Span::styled(detab(&code), inline_code_style()));
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                flush(&mut lines, &mut current);
            }
            Event::Rule => {
                flush(&mut lines, &mut current);
                lines.push(Line::from(Span::styled(
                    "─".repeat(24),
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::from(""));
            }
            Event::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                current.push(Span::styled(marker.to_string(), list_marker_style()));
            }
            _ => {}
        }
    }

    flush(&mut lines, &mut current);
    while lines.last().is_some_and(|l| l.spans.iter().all(|s| s.content.is_empty())) {
        lines.pop();
    }
    lines
}
