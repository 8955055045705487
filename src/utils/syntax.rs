use ratatui::style::{Color as TuiColor, Style};
use ratatui::text::{Line, Span};
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

/// Background painted behind highlighted code, matching the syntect theme's
/// own canvas color.
pub const CODE_BLOCK_BG: TuiColor = TuiColor::Rgb(43, 48, 59);

const SYNTECT_THEME: &str = "base16-ocean.dark";
const FALLBACK_THEMES: [&str; 2] = ["base16-eighties.dark", "Solarized (dark)"];

// Simple FIFO cache (bounded) for highlighted blocks
// key = (lang_norm, hash)

fn hash_code(lang: &str, code: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    lang.hash(&mut hasher);
    code.hash(&mut hasher);
    hasher.finish()
}

struct SimpleCache {
    map: HashMap<(String, u64), Vec<Line<'static>>>,
    order: VecDeque<(String, u64)>,
    cap: usize,
}

impl SimpleCache {
    fn new(cap: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            cap,
        }
    }
    fn get(&mut self, k: &(String, u64)) -> Option<Vec<Line<'static>>> {
        self.map.get(k).cloned()
    }
    fn put(&mut self, k: (String, u64), v: Vec<Line<'static>>) {
        if !self.map.contains_key(&k) {
            self.order.push_back(k.clone());
        }
        self.map.insert(k, v);
        while self.map.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

static SYNTAX_CACHE: Mutex<Option<SimpleCache>> = Mutex::new(None);

fn get_cache() -> std::sync::MutexGuard<'static, Option<SimpleCache>> {
    match SYNTAX_CACHE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn ensure_cache(cap: usize) {
    let mut guard = get_cache();
    if guard.is_none() {
        *guard = Some(SimpleCache::new(cap));
    }
}

fn normalize_lang_hint(s: &str) -> String {
    let t = s.trim().to_ascii_lowercase();
    match t.as_str() {
        "py" | "python" => "python".into(),
        "bash" | "sh" | "zsh" | "shell" => "bash".into(),
        "js" | "javascript" | "jsx" => "javascript".into(),
        "ts" | "tsx" | "typescript" => "typescript".into(),
        "rb" | "ruby" => "ruby".into(),
        "yaml" | "yml" => "yaml".into(),
        "rust" | "rs" => "rust".into(),
        "c" | "h" => "c".into(),
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp".into(),
        "kotlin" | "kt" => "kotlin".into(),
        "md" | "markdown" => "markdown".into(),
        other => other.into(),
    }
}

fn parse_tui_color_from_syntect(c: syntect::highlighting::Color) -> TuiColor {
    TuiColor::Rgb(c.r, c.g, c.b)
}

/// Highlight one fenced code block into styled lines. Unknown language hints
/// fall back to plain text, so this only returns `None` when syntect itself
/// fails on a line.
pub fn highlight_code_block(lang_hint: &str, code: &str) -> Option<Vec<Line<'static>>> {
    ensure_cache(64);
    let lang_norm = normalize_lang_hint(lang_hint);

    // Initialize syntect lazily
    static SYNTAX_SET: OnceLock<syntect::parsing::SyntaxSet> = OnceLock::new();
    static THEME_SET: OnceLock<syntect::highlighting::ThemeSet> = OnceLock::new();
    let ps = SYNTAX_SET.get_or_init(syntect::parsing::SyntaxSet::load_defaults_newlines);
    let ts = THEME_SET.get_or_init(syntect::highlighting::ThemeSet::load_defaults);

    let mut syn_theme = ts.themes.get(SYNTECT_THEME);
    if syn_theme.is_none() {
        for name in &FALLBACK_THEMES {
            if let Some(th) = ts.themes.get(*name) {
                syn_theme = Some(th);
                break;
            }
        }
    }
    let syn_theme = syn_theme?;

    let key = (lang_norm.clone(), hash_code(&lang_norm, code));
    if let Some(lines) = get_cache().as_mut().and_then(|c| c.get(&key)) {
        return Some(lines);
    }

    // Find syntax
    let syntax = ps
        .find_syntax_by_token(&lang_norm)
        .unwrap_or_else(|| ps.find_syntax_plain_text());

    let mut h = syntect::easy::HighlightLines::new(syntax, syn_theme);

    let mut out: Vec<Line<'static>> = Vec::new();
    for line in syntect::util::LinesWithEndings::from(code) {
        let ranges = h.highlight_line(line, ps).ok()?;
        let mut spans: Vec<Span<'static>> = Vec::new();
        for (style, text) in ranges {
            // strip trailing newline from the fragment before rendering in a Line
            let mut frag = text;
            if let Some(stripped) = frag.strip_suffix('\n') {
                frag = stripped;
            }
            let st = Style::default()
                .fg(parse_tui_color_from_syntect(style.foreground))
                .bg(CODE_BLOCK_BG);
            spans.push(Span::styled(frag.to_string(), st));
        }
        if spans.is_empty() {
            out.push(Line::from(""));
        } else {
            out.push(Line::from(spans));
        }
    }

    // Cache result
    {
        let mut guard = get_cache();
        if let Some(cache) = guard.as_mut() {
            cache.put(key, out.clone());
        }
    }
    Some(out)
}
