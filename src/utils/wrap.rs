//! Width-aware wrapping for styled transcript lines.
//!
//! The renderer wraps every line up front instead of leaning on ratatui's
//! `Wrap` widget, so scroll math and line counts always agree with what ends
//! up on screen. Wrapping happens at word boundaries, keeps span styles
//! intact, and hard-chunks tokens wider than the terminal. Widths are display
//! columns, so CJK and other wide characters count as two.

use ratatui::style::Style;
use ratatui::text::{Line, Span};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

enum Token {
    Word(Vec<(String, Style)>),
    Space(String, Style),
}

pub fn wrap_styled_lines(lines: &[Line<'_>], width: u16) -> Vec<Line<'static>> {
    let width = width as usize;
    if width == 0 {
        return lines.iter().map(to_owned_line).collect();
    }

    let mut out: Vec<Line<'static>> = Vec::with_capacity(lines.len());
    for line in lines {
        wrap_one(line, width, &mut out);
    }
    out
}

fn wrap_one(line: &Line<'_>, width: usize, out: &mut Vec<Line<'static>>) {
    if line.spans.iter().all(|s| s.content.is_empty()) {
        out.push(Line::from(""));
        return;
    }

    let emitted_before = out.len();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut current_width = 0usize;
    let mut continuation = false;

    for token in tokenize(line) {
        match token {
            Token::Word(pieces) => {
                let word_width: usize = pieces.iter().map(|(text, _)| text.width()).sum();
                if current_width > 0 && current_width + word_width > width {
                    flush(&mut current, out);
                    current_width = 0;
                    continuation = true;
                }
                if word_width > width {
                    chunk_word(&pieces, width, &mut current, &mut current_width, out);
                    continuation = true;
                } else {
                    for (text, style) in &pieces {
                        append_run(&mut current, *style, text);
                    }
                    current_width += word_width;
                }
            }
            Token::Space(text, style) => {
                // Whitespace at the head of a continuation line disappears;
                // indentation on the original first line stays.
                if current_width == 0 && continuation {
                    continue;
                }
                let space_width = text.width();
                if current_width + space_width > width {
                    flush(&mut current, out);
                    current_width = 0;
                    continuation = true;
                } else {
                    append_run(&mut current, style, &text);
                    current_width += space_width;
                }
            }
        }
    }

    if !current.is_empty() || out.len() == emitted_before {
        flush(&mut current, out);
    }
}

/// Emit the collected spans as one wrapped line, dropping whitespace left
/// dangling at the break.
fn flush(current: &mut Vec<Span<'static>>, out: &mut Vec<Line<'static>>) {
    while let Some(last) = current.last_mut() {
        let trimmed_len = last.content.trim_end().len();
        if trimmed_len == 0 {
            current.pop();
        } else {
            if trimmed_len != last.content.len() {
                let text = last.content[..trimmed_len].to_string();
                *last = Span::styled(text, last.style);
            }
            break;
        }
    }
    out.push(Line::from(std::mem::take(current)));
}

/// Split a styled line into alternating word and whitespace tokens. A word
/// crossing a span boundary stays one token so it never wraps mid-word.
fn tokenize(line: &Line<'_>) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    for span in &line.spans {
        let style = span.style;
        let mut rest: &str = &span.content;
        while !rest.is_empty() {
            let is_space = rest
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace());
            let split = rest
                .find(|c: char| c.is_whitespace() != is_space)
                .unwrap_or(rest.len());
            let (segment, tail) = rest.split_at(split);
            rest = tail;

            if is_space {
                tokens.push(Token::Space(segment.to_string(), style));
            } else if let Some(Token::Word(pieces)) = tokens.last_mut() {
                pieces.push((segment.to_string(), style));
            } else {
                tokens.push(Token::Word(vec![(segment.to_string(), style)]));
            }
        }
    }
    tokens
}

fn chunk_word(
    pieces: &[(String, Style)],
    width: usize,
    current: &mut Vec<Span<'static>>,
    current_width: &mut usize,
    out: &mut Vec<Line<'static>>,
) {
    for (text, style) in pieces {
        for grapheme in text.graphemes(true) {
            let grapheme_width = grapheme.width();
            if *current_width > 0 && *current_width + grapheme_width > width {
                flush(current, out);
                *current_width = 0;
            }
            append_run(current, *style, grapheme);
            *current_width += grapheme_width;
        }
    }
}

fn append_run(collector: &mut Vec<Span<'static>>, style: Style, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = collector.last_mut() {
        if last.style == style {
            let mut combined = String::with_capacity(last.content.len() + text.len());
            combined.push_str(&last.content);
            combined.push_str(text);
            *last = Span::styled(combined, style);
            return;
        }
    }
    collector.push(Span::styled(text.to_string(), style));
}

fn to_owned_line(line: &Line<'_>) -> Line<'static> {
    let spans: Vec<Span<'static>> = line
        .spans
        .iter()
        .map(|s| Span::styled(s.content.to_string(), s.style))
        .collect();
    Line::from(spans)
}
